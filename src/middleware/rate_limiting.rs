//! Policy enforcement: project-scope re-check and plan-tiered rate
//! limiting over an injected counter store.
//!
//! Counting is read-increment-write against the store; concurrent bursts
//! from one identity can transiently miscount by the number of in-flight
//! requests. This is a soft quota, not a billing-grade limiter.

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    http::Method,
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::{debug, error, warn};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::api_contract::envelope;
use crate::config::{RateLimitConfig, RateLimitTier};
use crate::error::AppError;
use crate::middleware::request_tracer::extract_client_ip;
use crate::middleware::unified_auth::PROJECT_SCOPE_HEADER;
use crate::models::{AuthenticatedIdentity, RequestContext};
use crate::stores::RateCounterStore;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Clone)]
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    project_scope: String,
    store: Arc<dyn RateCounterStore>,
}

impl RateLimitMiddleware {
    pub fn new(
        config: RateLimitConfig,
        project_scope: String,
        store: Arc<dyn RateCounterStore>,
    ) -> Self {
        Self {
            config,
            project_scope,
            store,
        }
    }

    /// Identity key and tier for this request. Authenticated requests are
    /// limited per user on their plan's tier; anything else falls back to
    /// per-IP limiting on the free tier.
    fn key_and_tier(&self, req: &ServiceRequest) -> (String, RateLimitTier) {
        if let Some(identity) = req.extensions().get::<AuthenticatedIdentity>() {
            let tier = self.config.tier_for_plan(&identity.plan).clone();
            (identity.rate_limit_key(), tier)
        } else {
            (
                format!("ip:{}", extract_client_ip(req)),
                self.config.free.clone(),
            )
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitService {
            service: Rc::new(service),
            middleware: self.clone(),
        })
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    middleware: RateLimitMiddleware,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let middleware = self.middleware.clone();

        Box::pin(async move {
            // Skip rate limiting for OPTIONS requests (CORS preflight)
            if req.method() == Method::OPTIONS {
                return service.call(req).await.map(|res| res.map_into_left_body());
            }

            // defense-in-depth: re-validate the project scope on the
            // protected route group even though the auth stage checked it
            let scope_ok = req
                .headers()
                .get(PROJECT_SCOPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim() == middleware.project_scope)
                .unwrap_or(false);
            if !scope_ok {
                let (request, _) = req.into_parts();
                let ctx = RequestContext::from_http_request(&request);
                let response = envelope::error_response(
                    &ctx,
                    &AppError::InvalidProjectScope(
                        "Project scope does not match this service".to_string(),
                    ),
                );
                return Ok(ServiceResponse::new(request, response).map_into_right_body());
            }

            let (key, tier) = middleware.key_and_tier(&req);

            let snapshot = match middleware
                .store
                .increment_or_reset(&key, tier.window_ms)
                .await
            {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("rate limit counter store failure for {}: {}", key, e);
                    let (request, _) = req.into_parts();
                    let ctx = RequestContext::from_http_request(&request);
                    let response = envelope::error_response(
                        &ctx,
                        &AppError::Internal("rate limiter unavailable".to_string()),
                    );
                    return Ok(ServiceResponse::new(request, response).map_into_right_body());
                }
            };

            if snapshot.count > tier.max_requests {
                let (request, _) = req.into_parts();
                let ctx = RequestContext::from_http_request(&request);
                warn!(
                    "rate limit exceeded for {} ({}/{} in window, request: {})",
                    key, snapshot.count, tier.max_requests, ctx.request_id
                );
                let response = envelope::error_response(
                    &ctx,
                    &AppError::RateLimited(
                        "Rate limit exceeded. Please try again later.".to_string(),
                    ),
                );
                return Ok(ServiceResponse::new(request, response).map_into_right_body());
            }

            debug!(
                "rate limit ok for {} ({}/{})",
                key, snapshot.count, tier.max_requests
            );

            let mut res = service.call(req).await?.map_into_left_body();
            let remaining = tier.max_requests - snapshot.count;
            let headers = res.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&tier.max_requests.to_string()) {
                headers.insert(HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER), v);
            }
            if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
                headers.insert(HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER), v);
            }
            if let Ok(v) = HeaderValue::from_str(&snapshot.reset_at.timestamp().to_string()) {
                headers.insert(HeaderName::from_static(RATE_LIMIT_RESET_HEADER), v);
            }

            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::request_tracer::RequestTracer;
    use crate::stores::memory::MemoryCounterStore;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App, HttpResponse};
    use serde_json::Value;

    const SCOPE: &str = "memocore";

    fn tiers(free_max: u64, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            free: RateLimitTier {
                max_requests: free_max,
                window_ms,
            },
            pro: RateLimitTier {
                max_requests: 300,
                window_ms,
            },
            enterprise: RateLimitTier {
                max_requests: 1000,
                window_ms,
            },
            redis_url: None,
            redis_key_prefix: "test".to_string(),
        }
    }

    async fn ping() -> HttpResponse {
        HttpResponse::Ok().json(serde_json::json!({"ok": true}))
    }

    macro_rules! limited_app {
        ($config:expr) => {
            test::init_service(
                App::new()
                    .service(
                        web::scope("/api/v1")
                            .wrap(RateLimitMiddleware::new(
                                $config,
                                SCOPE.to_string(),
                                Arc::new(MemoryCounterStore::new()),
                            ))
                            .route("/ping", web::get().to(ping)),
                    )
                    .wrap(RequestTracer),
            )
            .await
        };
    }

    fn ping_req() -> test::TestRequest {
        test::TestRequest::get()
            .uri("/api/v1/ping")
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
    }

    #[actix_web::test]
    async fn requests_over_the_limit_get_429() {
        let app = limited_app!(tiers(2, 60_000));

        for _ in 0..2 {
            let res = test::call_service(&app, ping_req().to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = test::call_service(&app, ping_req().to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["error"]["type"], "RateLimitError");
    }

    #[actix_web::test]
    async fn sixty_first_request_in_a_window_is_rejected() {
        let app = limited_app!(tiers(60, 60_000));

        for _ in 0..60 {
            let res = test::call_service(&app, ping_req().to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = test::call_service(&app, ping_req().to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn admitted_requests_carry_rate_limit_headers() {
        let app = limited_app!(tiers(5, 60_000));

        let res = test::call_service(&app, ping_req().to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()
                .get(RATE_LIMIT_LIMIT_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("5")
        );
        assert_eq!(
            res.headers()
                .get(RATE_LIMIT_REMAINING_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("4")
        );
        assert!(res.headers().get(RATE_LIMIT_RESET_HEADER).is_some());
    }

    #[actix_web::test]
    async fn window_rollover_admits_requests_again() {
        let app = limited_app!(tiers(1, 40));

        let res = test::call_service(&app, ping_req().to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = test::call_service(&app, ping_req().to_request()).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        let res = test::call_service(&app, ping_req().to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn scope_recheck_rejects_missing_header() {
        let app = limited_app!(tiers(5, 60_000));

        let req = test::TestRequest::get().uri("/api/v1/ping").to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INVALID_PROJECT_SCOPE");
    }
}
