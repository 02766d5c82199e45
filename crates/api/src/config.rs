use std::path::PathBuf;

use atelier_providers::remote::DEFAULT_ATTEMPTS;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight generations (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT validation settings.
    pub jwt: JwtConfig,
    /// Generation backends, storage and housekeeping.
    pub generation: GenerationConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            generation: GenerationConfig::from_env(),
        }
    }
}

/// Default age after which terminal jobs are purged.
const DEFAULT_RETENTION_DAYS: i64 = 30;
/// Default time a job may sit in `processing` before the watchdog fails it.
const DEFAULT_STUCK_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Root directory of the local binary store.
    pub image_store_dir: PathBuf,
    /// Base URL of the co-located inference service. Managed models fail
    /// at execution time when unset.
    pub managed_inference_url: Option<String>,
    /// Base URL of the remote image API. Remote models have no provider
    /// when unset.
    pub remote_api_url: Option<String>,
    pub remote_attempts: u32,
    pub job_retention_days: i64,
    pub stuck_job_timeout_secs: u64,
}

impl GenerationConfig {
    /// | Env Var                  | Default        |
    /// |--------------------------|----------------|
    /// | `IMAGE_STORE_DIR`        | `./data/images`|
    /// | `MANAGED_INFERENCE_URL`  | unset          |
    /// | `REMOTE_API_URL`         | unset          |
    /// | `REMOTE_UPLOAD_ATTEMPTS` | `2`            |
    /// | `JOB_RETENTION_DAYS`     | `30`           |
    /// | `STUCK_JOB_TIMEOUT_SECS` | `900`          |
    pub fn from_env() -> Self {
        let image_store_dir = std::env::var("IMAGE_STORE_DIR")
            .unwrap_or_else(|_| "./data/images".into())
            .into();

        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let remote_attempts: u32 = std::env::var("REMOTE_UPLOAD_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_ATTEMPTS.to_string())
            .parse()
            .expect("REMOTE_UPLOAD_ATTEMPTS must be a valid u32");

        let job_retention_days = parse_retention_days(
            &std::env::var("JOB_RETENTION_DAYS")
                .unwrap_or_else(|_| DEFAULT_RETENTION_DAYS.to_string()),
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let stuck_job_timeout_secs: u64 = std::env::var("STUCK_JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_STUCK_TIMEOUT_SECS.to_string())
            .parse()
            .expect("STUCK_JOB_TIMEOUT_SECS must be a valid u64");

        Self {
            image_store_dir,
            managed_inference_url: non_empty("MANAGED_INFERENCE_URL"),
            remote_api_url: non_empty("REMOTE_API_URL"),
            remote_attempts,
            job_retention_days,
            stuck_job_timeout_secs,
        }
    }
}

/// Retention must be at least one day; zero or negative values would make
/// the purge cutoff reach every terminal job.
fn parse_retention_days(raw: &str) -> Result<i64, String> {
    let days: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("JOB_RETENTION_DAYS must be a valid i64, got '{raw}'"))?;
    if days < 1 {
        return Err(format!("JOB_RETENTION_DAYS must be at least 1, got {days}"));
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_days_must_be_positive() {
        assert_eq!(parse_retention_days("30"), Ok(30));
        assert_eq!(parse_retention_days(" 1 "), Ok(1));
        assert!(parse_retention_days("0").is_err());
        assert!(parse_retention_days("-5").is_err());
        assert!(parse_retention_days("soon").is_err());
    }
}
