//! Store seams consumed by the auth pipeline.
//!
//! The gateway never talks to a concrete backend directly: credential,
//! organization, and rate-counter access all go through these traits.
//! Production wires the Postgres repositories from `crate::db`; the
//! in-memory implementations back tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

pub mod memory;
pub mod redis_counter;

/// Stored API key. Only the SHA-256 digest of the key is ever persisted;
/// the raw credential does not exist server-side.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_hash: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub name: String,
    pub service: String,
}

impl ApiKeyRecord {
    /// Active and not past its expiry at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |t| t > now)
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub plan: String,
    pub organization_id: Option<Uuid>,
}

/// Seed for fallback organization provisioning.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub owner_user_id: Uuid,
    pub slug: String,
    pub name: String,
}

/// Counter state after one admission check.
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AppError>;

    /// Record a successful use of the key (last-used timestamp, counter).
    async fn touch_usage(&self, id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError>;
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn exists(&self, id: Uuid) -> Result<bool, AppError>;

    async fn user_organization(&self, user_id: Uuid) -> Result<Option<Uuid>, AppError>;

    /// Creates an organization and links the owner to it. Returns
    /// `AppError::Conflict` when the slug is already taken, so callers
    /// can retry with a fresh slug.
    async fn create(&self, org: &NewOrganization) -> Result<Uuid, AppError>;
}

#[async_trait]
pub trait RateCounterStore: Send + Sync {
    /// Increments the counter for `key`, resetting it first when the
    /// current window has elapsed. Returns the post-increment count and
    /// the end of the current window.
    async fn increment_or_reset(
        &self,
        key: &str,
        window_ms: u64,
    ) -> Result<CounterSnapshot, AppError>;
}
