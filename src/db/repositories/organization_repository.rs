use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::stores::{NewOrganization, OrganizationStore};

pub struct OrganizationRepository {
    db_pool: PgPool,
}

impl OrganizationRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl OrganizationStore for OrganizationRepository {
    async fn exists(&self, id: Uuid) -> Result<bool, AppError> {
        let row = sqlx::query_as::<_, (i32,)>(
            "SELECT 1 FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to check organization: {}", e)))?;

        Ok(row.is_some())
    }

    async fn user_organization(&self, user_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let row = sqlx::query_as::<_, (Option<Uuid>,)>(
            "SELECT organization_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to fetch user organization: {}", e))
        })?;

        Ok(row.and_then(|r| r.0))
    }

    /// Inserts the organization and links the owner in one transaction.
    /// The unique constraint on `slug` turns a lost provisioning race
    /// into `AppError::Conflict` for the resolver to retry on.
    async fn create(&self, org: &NewOrganization) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let mut tx = self
            .db_pool
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let inserted = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO organizations (id, slug, name, owner_user_id, created_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (slug) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&org.slug)
        .bind(&org.name)
        .bind(org.owner_user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create organization: {}", e)))?;

        if inserted.is_none() {
            return Err(AppError::Conflict(format!(
                "organization slug '{}' already exists",
                org.slug
            )));
        }

        sqlx::query("UPDATE users SET organization_id = $1 WHERE id = $2")
            .bind(id)
            .bind(org.owner_user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to link organization owner: {}", e))
            })?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit organization: {}", e)))?;

        Ok(id)
    }
}
