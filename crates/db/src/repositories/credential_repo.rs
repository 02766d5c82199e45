//! Repository for the `provider_credentials` table.

use atelier_core::registry::ProviderKind;
use atelier_core::types::DbId;
use sqlx::PgPool;

use crate::models::credential::ProviderCredential;

const COLUMNS: &str = "id, owner_id, provider_kind, secret, created_at, updated_at";

pub struct CredentialRepo;

impl CredentialRepo {
    pub async fn find_secret(
        pool: &PgPool,
        owner_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT secret FROM provider_credentials WHERE owner_id = $1 AND provider_kind = $2",
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(secret,)| secret))
    }

    /// Insert or replace the credential for `(owner_id, kind)`.
    pub async fn upsert(
        pool: &PgPool,
        owner_id: DbId,
        kind: ProviderKind,
        secret: &str,
    ) -> Result<ProviderCredential, sqlx::Error> {
        let query = format!(
            "INSERT INTO provider_credentials (owner_id, provider_kind, secret) \
             VALUES ($1, $2, $3) \
             ON CONFLICT ON CONSTRAINT uq_provider_credentials_owner_kind \
             DO UPDATE SET secret = EXCLUDED.secret \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProviderCredential>(&query)
            .bind(owner_id)
            .bind(kind.as_str())
            .bind(secret)
            .fetch_one(pool)
            .await
    }
}
