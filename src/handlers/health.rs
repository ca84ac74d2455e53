use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

use crate::api_contract::envelope;
use crate::models::RequestContext;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check(ctx: RequestContext) -> HttpResponse {
    // Public health endpoint - only return basic status, no sensitive metrics
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    envelope::success(&ctx, response)
}
