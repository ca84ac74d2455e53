use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::stores::{UserRecord, UserStore};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    role: String,
    plan: String,
    organization_id: Option<Uuid>,
}

pub struct UserRepository {
    db_pool: PgPool,
}

impl UserRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, role, plan, organization_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| {
            log::error!("Database error fetching user {}: {}", id, e);
            AppError::Database(format!("Failed to fetch user: {}", e))
        })?;

        Ok(row.map(|r| UserRecord {
            id: r.id,
            email: r.email,
            role: r.role,
            plan: r.plan,
            organization_id: r.organization_id,
        }))
    }
}
