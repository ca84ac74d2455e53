use actix_web::HttpResponse;

use crate::api_contract::envelope;
use crate::models::{AuthenticatedIdentity, RequestContext};

/// Returns the identity the gateway resolved for this request: who you
/// are, which organization you landed in, and how you authenticated.
pub async fn whoami(ctx: RequestContext, identity: AuthenticatedIdentity) -> HttpResponse {
    envelope::success(&ctx, identity)
}
