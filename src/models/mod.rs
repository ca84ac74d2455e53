pub mod auth_jwt_claims;
pub mod authenticated_identity;
pub mod request_context;

pub use authenticated_identity::{AuthType, AuthenticatedIdentity};
pub use request_context::RequestContext;
