pub mod authorization;
pub mod cors_guard;
pub mod rate_limiting;
pub mod request_tracer;
pub mod unified_auth;

pub use authorization::{require_admin, require_plan, require_role};
pub use cors_guard::CorsGuard;
pub use rate_limiting::RateLimitMiddleware;
pub use request_tracer::RequestTracer;
pub use unified_auth::UnifiedAuth;
