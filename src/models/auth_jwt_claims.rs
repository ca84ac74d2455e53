use serde::{Deserialize, Serialize};

/// JWT claims accepted by the gateway.
///
/// Tokens minted by different issuers disagree on claim names, so the
/// subject and organization accessors try an explicit ordered list of
/// claim names; the first non-empty value wins. That priority order is a
/// documented contract:
///
/// - subject: `sub`, then `userId`, then `user_id`
/// - organization: `organization_id`, then `org_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id_legacy: Option<String>,
    /// Expiration time (as UTC timestamp)
    pub exp: i64,
    /// Issued at (as UTC timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// User role (e.g., "user", "admin")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Subscription plan (e.g., "free", "pro", "enterprise")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, rename = "org_id", skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

impl Claims {
    /// Subject id, resolved by claim-name priority: `sub`, `userId`, `user_id`.
    pub fn subject(&self) -> Option<&str> {
        [
            self.sub.as_deref(),
            self.user_id.as_deref(),
            self.user_id_legacy.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
    }

    /// Candidate organization id, resolved by priority: `organization_id`, `org_id`.
    /// May be malformed; the organization resolver owns validation.
    pub fn organization_candidate(&self) -> Option<&str> {
        [self.organization_id.as_deref(), self.org_id.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}
