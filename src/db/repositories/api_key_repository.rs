use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::stores::{ApiKeyRecord, ApiKeyStore};

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    user_id: Uuid,
    key_hash: String,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    name: String,
    service: String,
}

impl From<ApiKeyRow> for ApiKeyRecord {
    fn from(row: ApiKeyRow) -> Self {
        ApiKeyRecord {
            id: row.id,
            user_id: row.user_id,
            key_hash: row.key_hash,
            is_active: row.is_active,
            expires_at: row.expires_at,
            name: row.name,
            service: row.service,
        }
    }
}

pub struct ApiKeyRepository {
    db_pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ApiKeyStore for ApiKeyRepository {
    /// Looks a key up by its digest. Activity/expiry validation belongs
    /// to the authenticator, not the query.
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AppError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT id, user_id, key_hash, is_active, expires_at, name, service
            FROM api_keys
            WHERE key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| {
            log::error!("Database error finding API key: {}", e);
            AppError::Database(format!("Failed to fetch API key: {}", e))
        })?;

        Ok(row.map(ApiKeyRecord::from))
    }

    /// Update last_used_at and increment request_count
    async fn touch_usage(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE api_keys
            SET last_used_at = now(),
                request_count = request_count + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to update API key usage: {}", e)))?;

        Ok(())
    }
}
