//! Tenant resolution with fallback provisioning.
//!
//! Every authenticated request must end up with exactly one valid
//! organization id. The resolver tries, in order: the candidate id from
//! the credential, the user's stored organization, and finally a
//! freshly provisioned single-user organization. Downstream code never
//! sees a null or malformed tenant id.

use chrono::Utc;
use log::{debug, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::stores::{NewOrganization, OrganizationStore};

/// Which step of the resolution chain produced the organization id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    ClaimLookup,
    DbLookup,
    FallbackCreated,
}

#[derive(Clone, Debug)]
pub struct OrganizationResolution {
    pub organization_id: Uuid,
    pub source: ResolutionSource,
}

const CREATE_ATTEMPTS: usize = 3;

pub struct OrganizationResolver {
    store: Arc<dyn OrganizationStore>,
    store_timeout: Duration,
}

impl OrganizationResolver {
    pub fn new(store: Arc<dyn OrganizationStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Resolves a possibly-absent/malformed candidate id to a valid,
    /// existing organization. First match wins.
    pub async fn resolve(
        &self,
        candidate: Option<&str>,
        user_id: Uuid,
    ) -> Result<OrganizationResolution, AppError> {
        // 1. candidate from the credential, when it parses and exists
        if let Some(raw) = candidate {
            match Uuid::parse_str(raw.trim()) {
                Ok(id) => {
                    if self.call(self.store.exists(id)).await? {
                        return Ok(OrganizationResolution {
                            organization_id: id,
                            source: ResolutionSource::ClaimLookup,
                        });
                    }
                    debug!(
                        "organization {} from credential does not exist, falling back for user {}",
                        id, user_id
                    );
                }
                Err(_) => {
                    debug!(
                        "ignoring malformed organization candidate for user {}",
                        user_id
                    );
                }
            }
        }

        // 2. the user's stored organization
        if let Some(id) = self.call(self.store.user_organization(user_id)).await? {
            if self.call(self.store.exists(id)).await? {
                return Ok(OrganizationResolution {
                    organization_id: id,
                    source: ResolutionSource::DbLookup,
                });
            }
            warn!(
                "stored organization {} for user {} no longer exists",
                id, user_id
            );
        }

        // 3. provision one
        self.provision(user_id).await
    }

    /// Creates a single-user organization. Slug collisions mean another
    /// request won the race; re-check the stored organization and retry
    /// with a fresh slug otherwise.
    async fn provision(&self, user_id: Uuid) -> Result<OrganizationResolution, AppError> {
        for attempt in 1..=CREATE_ATTEMPTS {
            let slug = provision_slug(user_id);
            let org = NewOrganization {
                owner_user_id: user_id,
                slug: slug.clone(),
                name: format!("workspace-{}", short_user_tag(user_id)),
            };

            match self.call(self.store.create(&org)).await {
                Ok(id) => {
                    info!(
                        "provisioned fallback organization {} (slug {}) for user {}",
                        id, slug, user_id
                    );
                    return Ok(OrganizationResolution {
                        organization_id: id,
                        source: ResolutionSource::FallbackCreated,
                    });
                }
                Err(AppError::Conflict(_)) => {
                    if let Some(id) = self.call(self.store.user_organization(user_id)).await? {
                        debug!(
                            "lost provisioning race for user {}, using organization {}",
                            user_id, id
                        );
                        return Ok(OrganizationResolution {
                            organization_id: id,
                            source: ResolutionSource::DbLookup,
                        });
                    }
                    warn!(
                        "organization slug conflict for user {} (attempt {}), retrying",
                        user_id, attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Internal(format!(
            "failed to provision organization for user {} after {} attempts",
            user_id, CREATE_ATTEMPTS
        )))
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| AppError::Internal("organization store call timed out".to_string()))?
    }
}

fn short_user_tag(user_id: Uuid) -> String {
    user_id.simple().to_string()[..8].to_string()
}

/// Collision-resistant slug: user tag + millisecond timestamp + random
/// suffix, so concurrent retries never regenerate the same value.
fn provision_slug(user_id: Uuid) -> String {
    let mut suffix = [0u8; 2];
    rand::rng().fill_bytes(&mut suffix);
    format!(
        "org-{}-{}-{}",
        short_user_tag(user_id),
        Utc::now().timestamp_millis(),
        hex::encode(suffix)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryAuthStore;
    use crate::stores::UserRecord;
    use pretty_assertions::assert_eq;

    fn resolver(store: Arc<MemoryAuthStore>) -> OrganizationResolver {
        OrganizationResolver::new(store, Duration::from_secs(1))
    }

    fn seed_user(store: &MemoryAuthStore, organization_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        store.insert_user(UserRecord {
            id,
            email: format!("{}@example.com", id.simple()),
            role: "user".to_string(),
            plan: "free".to_string(),
            organization_id,
        });
        id
    }

    #[tokio::test]
    async fn valid_existing_candidate_wins() {
        let store = Arc::new(MemoryAuthStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(org_id, "org-seeded", "seeded");
        let user_id = seed_user(&store, None);

        let resolution = resolver(store)
            .resolve(Some(&org_id.to_string()), user_id)
            .await
            .unwrap();

        assert_eq!(resolution.organization_id, org_id);
        assert_eq!(resolution.source, ResolutionSource::ClaimLookup);
    }

    #[tokio::test]
    async fn malformed_candidate_falls_back_to_stored_org() {
        let store = Arc::new(MemoryAuthStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(org_id, "org-stored", "stored");
        let user_id = seed_user(&store, Some(org_id));

        let resolution = resolver(store)
            .resolve(Some("not-a-uuid"), user_id)
            .await
            .unwrap();

        assert_eq!(resolution.organization_id, org_id);
        assert_eq!(resolution.source, ResolutionSource::DbLookup);
    }

    #[tokio::test]
    async fn unknown_candidate_uuid_falls_back_to_stored_org() {
        let store = Arc::new(MemoryAuthStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(org_id, "org-known", "known");
        let user_id = seed_user(&store, Some(org_id));

        let resolution = resolver(store)
            .resolve(Some(&Uuid::new_v4().to_string()), user_id)
            .await
            .unwrap();

        assert_eq!(resolution.organization_id, org_id);
        assert_eq!(resolution.source, ResolutionSource::DbLookup);
    }

    #[tokio::test]
    async fn no_candidate_and_no_stored_org_provisions_one() {
        let store = Arc::new(MemoryAuthStore::new());
        let user_id = seed_user(&store, None);
        let resolver = resolver(store.clone());

        let first = resolver.resolve(None, user_id).await.unwrap();
        assert_eq!(first.source, ResolutionSource::FallbackCreated);
        assert!(store.exists(first.organization_id).await.unwrap());
        let (slug, name) = store.organization(first.organization_id).unwrap();
        assert!(slug.starts_with("org-"));
        assert!(name.starts_with("workspace-"));

        // repeated resolution is idempotent: the provisioned org is now
        // the user's stored org
        let second = resolver.resolve(None, user_id).await.unwrap();
        assert_eq!(second.organization_id, first.organization_id);
        assert_eq!(second.source, ResolutionSource::DbLookup);
        assert_eq!(store.organization_count(), 1);
    }

    #[tokio::test]
    async fn provisioned_slugs_differ_for_one_user() {
        let user_id = Uuid::new_v4();
        let a = provision_slug(user_id);
        let b = provision_slug(user_id);
        assert_ne!(a, b);
    }
}
