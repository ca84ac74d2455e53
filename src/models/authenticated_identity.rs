use actix_web::{dev::Payload, Error, FromRequest, HttpMessage, HttpRequest};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use uuid::Uuid;

/// How a request proved its identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    Jwt,
}

/// Resolved per-request identity. Built once by the auth pipeline,
/// carried in request extensions, discarded with the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
    pub plan: String,
    pub email: String,
    pub auth_type: AuthType,
    pub project_scope: String,
}

impl AuthenticatedIdentity {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Key under which this identity's rate-limit counter lives.
    pub fn rate_limit_key(&self) -> String {
        format!("user:{}", self.user_id)
    }
}

impl FromRequest for AuthenticatedIdentity {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        if let Some(identity) = req.extensions().get::<AuthenticatedIdentity>() {
            ready(Ok(identity.clone()))
        } else {
            ready(Err(actix_web::error::ErrorUnauthorized("Not authenticated")))
        }
    }
}
