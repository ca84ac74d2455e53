use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::api_contract::envelope;
use crate::config::AppSettings;
use crate::models::RequestContext;

/// Admin-only view of the authoritative rate-limit tier table.
pub async fn rate_limit_tiers(
    ctx: RequestContext,
    settings: web::Data<AppSettings>,
) -> HttpResponse {
    let limits = &settings.rate_limit;
    envelope::success(
        &ctx,
        json!({
            "free": limits.free,
            "pro": limits.pro,
            "enterprise": limits.enterprise,
        }),
    )
}
