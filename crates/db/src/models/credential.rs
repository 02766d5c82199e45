//! Stored provider credentials.

use atelier_core::registry::ProviderKind;
use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `provider_credentials` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProviderCredential {
    pub id: DbId,
    pub owner_id: DbId,
    #[sqlx(try_from = "String")]
    pub provider_kind: ProviderKind,
    #[serde(skip_serializing)]
    pub secret: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
