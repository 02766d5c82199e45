use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atelier_core::registry::{ModelRegistry, ProviderKind};
use atelier_core::storage::{BinaryStore, LocalBinaryStore};
use atelier_db::pg::PgStore;
use atelier_providers::{ComputeHandle, Dispatcher, ManagedProvider, RemoteProvider};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_api::background;
use atelier_api::config::ServerConfig;
use atelier_api::engine::{Orchestrator, Stores};
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = atelier_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    atelier_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    atelier_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Generation engine ---

    let generation = &config.generation;
    let registry = ModelRegistry::builtin();
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client");

    let mut dispatcher = Dispatcher::default();
    dispatcher.register(Arc::new(ManagedProvider::new(
        http.clone(),
        registry.ids_for(ProviderKind::Managed),
    )));
    match &generation.remote_api_url {
        Some(url) => {
            dispatcher.register(Arc::new(
                RemoteProvider::new(http, url.as_str(), registry.ids_for(ProviderKind::Remote))
                    .with_attempts(generation.remote_attempts),
            ));
            tracing::info!(%url, attempts = generation.remote_attempts, "Remote provider registered");
        }
        None => tracing::warn!("REMOTE_API_URL not set; remote models are unavailable"),
    }

    let compute = generation.managed_inference_url.as_deref().map(ComputeHandle::new);
    if compute.is_none() {
        tracing::warn!("MANAGED_INFERENCE_URL not set; managed generations will fail");
    }

    let binaries: Arc<dyn BinaryStore> =
        Arc::new(LocalBinaryStore::new(&generation.image_store_dir));
    tracing::info!(dir = %generation.image_store_dir.display(), "Binary store ready");

    let stores = Stores::postgres(PgStore::new(pool), Arc::clone(&binaries));
    let orchestrator = Orchestrator::new(registry, dispatcher, stores).with_compute(compute);

    // --- Housekeeping ---

    let housekeeping_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(background::job_retention::run(
        Arc::clone(orchestrator.jobs()),
        binaries,
        generation.job_retention_days,
        housekeeping_cancel.clone(),
    ));
    let watchdog_handle = tokio::spawn(background::stuck_jobs::run(
        Arc::clone(orchestrator.jobs()),
        Duration::from_secs(generation.stuck_job_timeout_secs),
        housekeeping_cancel.clone(),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: orchestrator.clone(),
    };
    let app = build_app_router(state, &config);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped accepting connections, cleaning up");

    let in_flight = orchestrator.supervisor().in_flight();
    tracing::info!(in_flight, "Waiting for in-flight generations");
    let drained = orchestrator
        .supervisor()
        .drain(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    if drained {
        tracing::info!("All generations settled");
    } else {
        tracing::warn!(
            remaining = orchestrator.supervisor().in_flight(),
            "Shutdown timeout reached with generations still running",
        );
    }

    housekeeping_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), watchdog_handle).await;
    tracing::info!("Housekeeping tasks stopped");

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
