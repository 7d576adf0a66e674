use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use thiserror::Error;

use crate::models::profile::ProfileSnapshot;

#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("profile not found for user '{0}'")]
    NotFound(String),

    #[error("profile store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read-only access to user profiles. A missing profile is fatal input, never retried.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<ProfileSnapshot, ProfileStoreError>;
}

/// Profiles stored as one JSONB document per user in `profiles(user_id, document)`.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn fetch(&self, user_id: &str) -> Result<ProfileSnapshot, ProfileStoreError> {
        let document: Option<Json<ProfileSnapshot>> =
            sqlx::query_scalar("SELECT document FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Json(mut profile) =
            document.ok_or_else(|| ProfileStoreError::NotFound(user_id.to_string()))?;
        // the row key is authoritative over whatever the document claims
        profile.user_id = user_id.to_string();
        Ok(profile)
    }
}
