//! Shared authentication pipeline.
//!
//! Every host adapter (the long-running actix server today, any future
//! stateless entry point) feeds credential headers into this one struct
//! instead of re-implementing the checks per deployment target. The
//! pipeline is single-shot per request: no retries, no cancellation.

use chrono::Utc;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AuthType, AuthenticatedIdentity};
use crate::services::auth::jwt;
use crate::services::org_resolver::OrganizationResolver;
use crate::security::api_key_hashing::ensure_hashed;
use crate::stores::{ApiKeyStore, OrganizationStore, UserStore};

const DEFAULT_ROLE: &str = "user";
const DEFAULT_PLAN: &str = "free";

/// The store seams the pipeline depends on.
#[derive(Clone)]
pub struct AuthStores {
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub users: Arc<dyn UserStore>,
    pub organizations: Arc<dyn OrganizationStore>,
}

/// Credential material extracted from request headers. Extraction is the
/// host adapter's job; classification and verification happen here.
#[derive(Clone, Copy, Debug, Default)]
pub struct CredentialHeaders<'a> {
    pub project_scope: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub bearer: Option<&'a str>,
}

pub struct AuthPipeline {
    stores: AuthStores,
    resolver: OrganizationResolver,
    project_scope: String,
    store_timeout: Duration,
}

impl AuthPipeline {
    pub fn new(stores: AuthStores, project_scope: String, store_timeout_ms: u64) -> Self {
        let store_timeout = Duration::from_millis(store_timeout_ms);
        let resolver = OrganizationResolver::new(stores.organizations.clone(), store_timeout);
        Self {
            stores,
            resolver,
            project_scope,
            store_timeout,
        }
    }

    pub fn project_scope(&self) -> &str {
        &self.project_scope
    }

    /// Scope equality gate. Runs before any credential is inspected; a
    /// missing header cannot equal the tenant label and is rejected too.
    pub fn verify_project_scope(&self, supplied: Option<&str>) -> Result<(), AppError> {
        match supplied {
            Some(scope) if scope.trim() == self.project_scope => Ok(()),
            Some(scope) => Err(AppError::InvalidProjectScope(format!(
                "Project scope '{}' does not match this service",
                scope.trim()
            ))),
            None => Err(AppError::InvalidProjectScope(
                "Missing X-Project-Scope header".to_string(),
            )),
        }
    }

    /// Classifies and verifies the request's credentials.
    ///
    /// Precedence: project scope first, then `X-API-Key` (machine
    /// credentials win when both are sent), then `Authorization: Bearer`,
    /// else `MISSING_AUTH`.
    pub async fn authenticate(
        &self,
        headers: CredentialHeaders<'_>,
    ) -> Result<AuthenticatedIdentity, AppError> {
        self.verify_project_scope(headers.project_scope)?;

        if let Some(api_key) = headers.api_key {
            self.authenticate_via_api_key(api_key).await
        } else if let Some(token) = headers.bearer {
            self.authenticate_via_jwt(token).await
        } else {
            Err(AppError::MissingAuth(
                "No API key or bearer token supplied".to_string(),
            ))
        }
    }

    /// API-key path: normalize to the stored digest form, look the record
    /// up, and validate activity and expiry.
    async fn authenticate_via_api_key(
        &self,
        candidate: &str,
    ) -> Result<AuthenticatedIdentity, AppError> {
        let key_hash = ensure_hashed(candidate.trim());

        let record = self
            .with_timeout(self.stores.api_keys.find_by_hash(&key_hash))
            .await?
            .ok_or_else(|| {
                warn!("unknown API key (hash prefix {})", &key_hash[..8]);
                AppError::InvalidApiKey("Invalid or inactive API key".to_string())
            })?;

        if !record.is_usable(Utc::now()) {
            warn!(
                "rejected inactive or expired API key {} ({})",
                record.id, record.name
            );
            return Err(AppError::InvalidApiKey(
                "Invalid or inactive API key".to_string(),
            ));
        }

        let user = self
            .with_timeout(self.stores.users.get_by_id(record.user_id))
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "user {} referenced by API key {} does not exist",
                    record.user_id, record.id
                ))
            })?;

        let candidate_org = user.organization_id.map(|id| id.to_string());
        let resolution = self
            .resolver
            .resolve(candidate_org.as_deref(), user.id)
            .await?;

        // usage bookkeeping must not block or fail the request
        let api_keys = Arc::clone(&self.stores.api_keys);
        let key_id = record.id;
        tokio::spawn(async move {
            if let Err(e) = api_keys.touch_usage(key_id).await {
                warn!("failed to update API key usage for {}: {}", key_id, e);
            }
        });

        debug!(
            "API key {} valid for user {} (role {})",
            record.id, user.id, user.role
        );

        Ok(AuthenticatedIdentity {
            user_id: user.id,
            organization_id: resolution.organization_id,
            role: user.role,
            plan: user.plan,
            email: user.email,
            auth_type: AuthType::ApiKey,
            project_scope: self.project_scope.clone(),
        })
    }

    /// JWT path: verify signature/expiry, resolve the subject by claim
    /// priority, and fill identity gaps from the user store.
    async fn authenticate_via_jwt(&self, token: &str) -> Result<AuthenticatedIdentity, AppError> {
        let claims = jwt::verify_token(token)?;

        let subject = claims.subject().ok_or_else(|| {
            AppError::InvalidJwtClaims(
                "Token carries no subject claim (sub, userId, user_id)".to_string(),
            )
        })?;

        let user_id = Uuid::parse_str(subject).map_err(|_| {
            AppError::InvalidJwtClaims(format!("Subject claim '{}' is not a valid UUID", subject))
        })?;

        let stored = self
            .with_timeout(self.stores.users.get_by_id(user_id))
            .await?;

        let resolution = self
            .resolver
            .resolve(claims.organization_candidate(), user_id)
            .await?;

        let email = claims
            .email
            .clone()
            .or_else(|| stored.as_ref().map(|u| u.email.clone()))
            .unwrap_or_default();
        let role = claims
            .role
            .clone()
            .or_else(|| stored.as_ref().map(|u| u.role.clone()))
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());
        let plan = claims
            .plan
            .clone()
            .or_else(|| stored.as_ref().map(|u| u.plan.clone()))
            .unwrap_or_else(|| DEFAULT_PLAN.to_string());

        debug!("JWT valid for user {} (role {})", user_id, role);

        Ok(AuthenticatedIdentity {
            user_id,
            organization_id: resolution.organization_id,
            role,
            plan,
            email,
            auth_type: AuthType::Jwt,
            project_scope: self.project_scope.clone(),
        })
    }

    /// Store calls get an explicit deadline so a slow backend cannot
    /// stall the whole request pipeline.
    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| AppError::Internal("credential store call timed out".to_string()))?
    }
}
