//! In-memory store implementations backed by DashMap.
//!
//! `MemoryAuthStore` serves tests and local development. The
//! `MemoryCounterStore` is the counter backend for single-process hosts;
//! its counters do not survive a restart and are not shared between
//! instances, which keeps its guarantees best-effort only.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::stores::{
    ApiKeyRecord, ApiKeyStore, CounterSnapshot, NewOrganization, OrganizationStore,
    RateCounterStore, UserRecord, UserStore,
};

#[derive(Debug, Clone)]
struct OrganizationRecord {
    slug: String,
    name: String,
}

#[derive(Default)]
pub struct MemoryAuthStore {
    users: DashMap<Uuid, UserRecord>,
    api_keys: DashMap<String, ApiKeyRecord>,
    organizations: DashMap<Uuid, OrganizationRecord>,
    slugs: DashMap<String, Uuid>,
    key_usage: DashMap<Uuid, DateTime<Utc>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.users.insert(user.id, user);
    }

    pub fn insert_api_key(&self, record: ApiKeyRecord) {
        self.api_keys.insert(record.key_hash.clone(), record);
    }

    pub fn insert_organization(&self, id: Uuid, slug: &str, name: &str) {
        self.slugs.insert(slug.to_string(), id);
        self.organizations.insert(
            id,
            OrganizationRecord {
                slug: slug.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn organization_count(&self) -> usize {
        self.organizations.len()
    }

    /// (slug, name) of a stored organization, for assertions in tests.
    pub fn organization(&self, id: Uuid) -> Option<(String, String)> {
        self.organizations
            .get(&id)
            .map(|e| (e.value().slug.clone(), e.value().name.clone()))
    }

    pub fn last_used_at(&self, key_id: Uuid) -> Option<DateTime<Utc>> {
        self.key_usage.get(&key_id).map(|e| *e.value())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryAuthStore {
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AppError> {
        Ok(self.api_keys.get(key_hash).map(|e| e.value().clone()))
    }

    async fn touch_usage(&self, id: Uuid) -> Result<(), AppError> {
        self.key_usage.insert(id, Utc::now());
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryAuthStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        Ok(self.users.get(&id).map(|e| e.value().clone()))
    }
}

#[async_trait]
impl OrganizationStore for MemoryAuthStore {
    async fn exists(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.organizations.contains_key(&id))
    }

    async fn user_organization(&self, user_id: Uuid) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .users
            .get(&user_id)
            .and_then(|u| u.value().organization_id))
    }

    async fn create(&self, org: &NewOrganization) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();

        // the slug map is the unique constraint; losing the insert race
        // surfaces as a conflict, exactly like the database backend
        if self.slugs.entry(org.slug.clone()).or_insert(id).value() != &id {
            return Err(AppError::Conflict(format!(
                "organization slug '{}' already exists",
                org.slug
            )));
        }

        self.organizations.insert(
            id,
            OrganizationRecord {
                slug: org.slug.clone(),
                name: org.name.clone(),
            },
        );

        if let Some(mut owner) = self.users.get_mut(&org.owner_user_id) {
            owner.organization_id = Some(id);
        }

        Ok(id)
    }
}

#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    reset_at: DateTime<Utc>,
}

/// Process-local fixed-window counters.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops windows that ended before `now`.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let before = self.counters.len();
        self.counters.retain(|_, entry| entry.reset_at > now);
        let removed = before - self.counters.len();
        if removed > 0 {
            debug!("cleaned up {} expired rate limit counters", removed);
        }
    }
}

#[async_trait]
impl RateCounterStore for MemoryCounterStore {
    async fn increment_or_reset(
        &self,
        key: &str,
        window_ms: u64,
    ) -> Result<CounterSnapshot, AppError> {
        let now = Utc::now();
        let window = Duration::milliseconds(window_ms as i64);

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                count: 0,
                reset_at: now + window,
            });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count += 1;

        Ok(CounterSnapshot {
            count: entry.count,
            reset_at: entry.reset_at,
        })
    }
}

/// Periodic sweep of expired in-memory counters.
pub fn start_counter_cleanup_task(store: Arc<MemoryCounterStore>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        info!(
            "Starting rate limit counter cleanup task (interval: {}s)",
            interval_secs
        );

        loop {
            interval.tick().await;
            store.cleanup_expired();
        }
    });
}
