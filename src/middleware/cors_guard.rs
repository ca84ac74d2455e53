//! CORS guard and baseline security headers.
//!
//! Keeps an origin allowlist (configured origins plus fixed development
//! defaults), answers preflights itself, rejects disallowed origins with
//! an error envelope, and stamps security headers on every response that
//! passes through it.

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{self, HeaderMap, HeaderValue},
    http::Method,
    Error, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::api_contract::envelope;
use crate::error::AppError;
use crate::models::RequestContext;

/// Origins that are always allowed in development builds.
const DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
];

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str =
    "Authorization, Content-Type, X-API-Key, X-Project-Scope, X-Request-ID";
const MAX_AGE_SECS: &str = "86400"; // 24h

fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
}

#[derive(Clone)]
pub struct CorsGuard {
    allowed_origins: Arc<HashSet<String>>,
}

impl CorsGuard {
    pub fn new(configured_origins: &[String]) -> Self {
        let mut allowed: HashSet<String> = configured_origins
            .iter()
            .map(|o| o.trim_end_matches('/').to_string())
            .collect();
        for origin in DEV_ORIGINS {
            allowed.insert((*origin).to_string());
        }

        Self {
            allowed_origins: Arc::new(allowed),
        }
    }

    fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin.trim_end_matches('/'))
    }
}

impl<S, B> Transform<S, ServiceRequest> for CorsGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = CorsGuardService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CorsGuardService {
            service: Rc::new(service),
            guard: self.clone(),
        })
    }
}

pub struct CorsGuardService<S> {
    service: Rc<S>,
    guard: CorsGuard,
}

impl<S, B> Service<ServiceRequest> for CorsGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let guard = self.guard.clone();

        Box::pin(async move {
            let origin = req
                .headers()
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            // a present-but-disallowed origin is rejected before any
            // further processing, preflight or not
            if let Some(ref origin) = origin {
                if !guard.is_allowed(origin) {
                    warn!("rejected request from disallowed origin: {}", origin);
                    let (request, _) = req.into_parts();
                    let ctx = RequestContext::from_http_request(&request);
                    let mut response = envelope::error_response(
                        &ctx,
                        &AppError::OriginNotAllowed(format!(
                            "Origin '{}' is not allowed",
                            origin
                        )),
                    );
                    apply_security_headers(response.headers_mut());
                    return Ok(ServiceResponse::new(request, response).map_into_right_body());
                }
            }

            // answer preflights from allowed origins directly
            if req.method() == Method::OPTIONS {
                if let Some(ref origin) = origin {
                    let (request, _) = req.into_parts();
                    let mut response = HttpResponse::NoContent().finish();
                    {
                        let headers = response.headers_mut();
                        apply_cors_headers(headers, origin);
                        headers.insert(
                            header::ACCESS_CONTROL_ALLOW_METHODS,
                            HeaderValue::from_static(ALLOWED_METHODS),
                        );
                        headers.insert(
                            header::ACCESS_CONTROL_ALLOW_HEADERS,
                            HeaderValue::from_static(ALLOWED_HEADERS),
                        );
                        headers.insert(
                            header::ACCESS_CONTROL_MAX_AGE,
                            HeaderValue::from_static(MAX_AGE_SECS),
                        );
                        apply_security_headers(headers);
                    }
                    return Ok(ServiceResponse::new(request, response).map_into_right_body());
                }
            }

            let mut res = service.call(req).await?.map_into_left_body();
            {
                let headers = res.headers_mut();
                if let Some(ref origin) = origin {
                    apply_cors_headers(headers, origin);
                }
                apply_security_headers(headers);
            }
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::request_tracer::RequestTracer;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    const APP_ORIGIN: &str = "https://app.memocore.dev";

    async fn ping() -> HttpResponse {
        HttpResponse::Ok().json(serde_json::json!({"ok": true}))
    }

    macro_rules! guarded_app {
        () => {
            test::init_service(
                App::new()
                    .route("/ping", web::get().to(ping))
                    .wrap(CorsGuard::new(&[APP_ORIGIN.to_string()]))
                    .wrap(RequestTracer),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn preflight_from_allowed_origin_gets_204() {
        let app = guarded_app!();
        let req = test::TestRequest::with_uri("/ping")
            .method(Method::OPTIONS)
            .insert_header((header::ORIGIN, APP_ORIGIN))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            res.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some(APP_ORIGIN)
        );
        assert_eq!(
            res.headers()
                .get(header::ACCESS_CONTROL_MAX_AGE)
                .and_then(|v| v.to_str().ok()),
            Some("86400")
        );
    }

    #[actix_web::test]
    async fn preflight_from_disallowed_origin_is_rejected() {
        let app = guarded_app!();
        let req = test::TestRequest::with_uri("/ping")
            .method(Method::OPTIONS)
            .insert_header((header::ORIGIN, "https://evil.example.com"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "ORIGIN_NOT_ALLOWED");
        assert_eq!(body["error"]["type"], "CORSError");
    }

    #[actix_web::test]
    async fn disallowed_origin_is_rejected_on_plain_requests_too() {
        let app = guarded_app!();
        let req = test::TestRequest::get()
            .uri("/ping")
            .insert_header((header::ORIGIN, "https://evil.example.com"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn allowed_origin_gets_cors_and_security_headers() {
        let app = guarded_app!();
        let req = test::TestRequest::get()
            .uri("/ping")
            .insert_header((header::ORIGIN, APP_ORIGIN))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some(APP_ORIGIN)
        );
        assert_eq!(
            res.headers()
                .get(header::X_CONTENT_TYPE_OPTIONS)
                .and_then(|v| v.to_str().ok()),
            Some("nosniff")
        );
        assert_eq!(
            res.headers()
                .get(header::X_FRAME_OPTIONS)
                .and_then(|v| v.to_str().ok()),
            Some("DENY")
        );
    }

    #[actix_web::test]
    async fn dev_origins_are_always_allowed() {
        let app = guarded_app!();
        let req = test::TestRequest::get()
            .uri("/ping")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn requests_without_origin_pass_through() {
        let app = guarded_app!();
        let req = test::TestRequest::get().uri("/ping").to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
        assert_eq!(
            res.headers()
                .get(header::REFERRER_POLICY)
                .and_then(|v| v.to_str().ok()),
            Some("strict-origin-when-cross-origin")
        );
    }
}
