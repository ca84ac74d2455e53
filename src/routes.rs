use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::handlers;
use crate::middleware::authorization::require_admin;
use crate::models::RequestContext;

/// Endpoint prefixes advertised by the 404 handler.
pub const API_PREFIXES: &[&str] = &["/health", "/api/v1/auth", "/api/v1/admin"];

/// Configures API routes that require authentication.
/// Mounted under the "/api/v1" scope and wrapped with the unified auth
/// and rate limiting middleware in main.rs.
pub fn configure_api_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth") // Base path: /api/v1/auth
            .route("/whoami", web::get().to(handlers::auth::whoami_handler::whoami)),
    );
    cfg.service(
        web::scope("/admin") // Base path: /api/v1/admin
            .wrap(require_admin())
            .route(
                "/rate-limits",
                web::get().to(handlers::admin_handlers::rate_limit_tiers),
            ),
    );
}

/// Catch-all for unmatched routes: envelope shape plus the fixed list of
/// available endpoint prefixes.
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    let ctx = RequestContext::from_http_request(&req);

    HttpResponse::NotFound().json(json!({
        "error": {
            "message": format!("No route matches {} {}", ctx.method, ctx.path),
            "type": "NotFoundError",
            "code": "NOT_FOUND",
        },
        "request_id": ctx.request_id,
        "timestamp": Utc::now().to_rfc3339(),
        "path": ctx.path,
        "method": ctx.method,
        "available_endpoints": API_PREFIXES,
    }))
}
