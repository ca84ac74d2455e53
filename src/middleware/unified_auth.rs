//! Unified authentication middleware.
//!
//! Thin actix adapter over [`AuthPipeline`]: extracts the credential
//! headers, runs the shared pipeline, and either installs the resolved
//! identity in request extensions or short-circuits with an error
//! envelope. CORS preflights are exempt; the CORS guard owns those.

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    http::Method,
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::{debug, warn};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::api_contract::envelope;
use crate::models::RequestContext;
use crate::services::auth::{AuthPipeline, CredentialHeaders};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const PROJECT_SCOPE_HEADER: &str = "x-project-scope";

fn header_string(req: &ServiceRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `Authorization: Bearer <token>`, when present.
fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[derive(Clone)]
pub struct UnifiedAuth {
    pipeline: Arc<AuthPipeline>,
}

impl UnifiedAuth {
    pub fn new(pipeline: Arc<AuthPipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S, B> Transform<S, ServiceRequest> for UnifiedAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = UnifiedAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(UnifiedAuthService {
            service: Rc::new(service),
            pipeline: self.pipeline.clone(),
        })
    }
}

pub struct UnifiedAuthService<S> {
    service: Rc<S>,
    pipeline: Arc<AuthPipeline>,
}

impl<S, B> Service<ServiceRequest> for UnifiedAuthService<S>
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
        let pipeline = self.pipeline.clone();

        Box::pin(async move {
            // CORS preflights carry no credentials
            if req.method() == Method::OPTIONS {
                return service.call(req).await.map(|res| res.map_into_left_body());
            }

            let scope = header_string(&req, PROJECT_SCOPE_HEADER);
            let api_key = header_string(&req, API_KEY_HEADER);
            let bearer = bearer_token(&req);

            let outcome = pipeline
                .authenticate(CredentialHeaders {
                    project_scope: scope.as_deref(),
                    api_key: api_key.as_deref(),
                    bearer: bearer.as_deref(),
                })
                .await;

            match outcome {
                Ok(identity) => {
                    debug!(
                        "authenticated user {} via {:?} for {}",
                        identity.user_id,
                        identity.auth_type,
                        req.path()
                    );
                    req.extensions_mut().insert(identity);
                    service.call(req).await.map(|res| res.map_into_left_body())
                }
                Err(err) => {
                    let (request, _) = req.into_parts();
                    let ctx = RequestContext::from_http_request(&request);
                    warn!(
                        "authentication rejected for {} {}: {} (request: {})",
                        ctx.method, ctx.path, err, ctx.request_id
                    );
                    let response = envelope::error_response(&ctx, &err);
                    Ok(ServiceResponse::new(request, response).map_into_right_body())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use crate::middleware::request_tracer::RequestTracer;
    use crate::security::api_key_hashing::ensure_hashed;
    use crate::services::auth::jwt::testkeys;
    use crate::services::auth::AuthStores;
    use crate::stores::memory::MemoryAuthStore;
    use crate::stores::{ApiKeyRecord, UserRecord};
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};
    use chrono::Utc;
    use serde_json::{json, Value};
    use uuid::Uuid;

    const SCOPE: &str = "memocore";

    struct Fixture {
        store: Arc<MemoryAuthStore>,
        pipeline: Arc<AuthPipeline>,
        user_id: Uuid,
        org_id: Uuid,
    }

    fn fixture() -> Fixture {
        testkeys::init();
        let store = Arc::new(MemoryAuthStore::new());

        let org_id = Uuid::new_v4();
        store.insert_organization(org_id, "org-unified", "unified");

        let user_id = Uuid::new_v4();
        store.insert_user(UserRecord {
            id: user_id,
            email: "dev@example.com".to_string(),
            role: "user".to_string(),
            plan: "free".to_string(),
            organization_id: Some(org_id),
        });
        store.insert_api_key(ApiKeyRecord {
            id: Uuid::new_v4(),
            user_id,
            key_hash: ensure_hashed("abc123"),
            is_active: true,
            expires_at: None,
            name: "ci".to_string(),
            service: "api".to_string(),
        });

        let pipeline = Arc::new(AuthPipeline::new(
            AuthStores {
                api_keys: store.clone(),
                users: store.clone(),
                organizations: store.clone(),
            },
            SCOPE.to_string(),
            1000,
        ));

        Fixture {
            store,
            pipeline,
            user_id,
            org_id,
        }
    }

    macro_rules! protected_app {
        ($pipeline:expr) => {
            test::init_service(
                App::new()
                    .service(
                        web::scope("/api/v1")
                            .wrap(UnifiedAuth::new($pipeline))
                            .route(
                                "/auth/whoami",
                                web::get().to(handlers::auth::whoami_handler::whoami),
                            ),
                    )
                    .wrap(RequestTracer),
            )
            .await
        };
    }

    fn whoami_req() -> test::TestRequest {
        test::TestRequest::get().uri("/api/v1/auth/whoami")
    }

    #[actix_web::test]
    async fn missing_credentials_return_401_missing_auth() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "MISSING_AUTH");
        assert_eq!(body["error"]["type"], "AuthError");
        assert_eq!(body["path"], "/api/v1/auth/whoami");
        assert_eq!(body["method"], "GET");
    }

    #[actix_web::test]
    async fn scope_mismatch_beats_valid_credentials() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, "someone-elses-tenant"))
            .insert_header((API_KEY_HEADER, "abc123"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INVALID_PROJECT_SCOPE");
    }

    #[actix_web::test]
    async fn api_key_authenticates_and_resolves_identity() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .insert_header((API_KEY_HEADER, "abc123"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["data"]["auth_type"], "api_key");
        assert_eq!(body["data"]["role"], "user");
        assert_eq!(body["data"]["user_id"], f.user_id.to_string());
        assert_eq!(body["data"]["organization_id"], f.org_id.to_string());
    }

    #[actix_web::test]
    async fn api_key_wins_over_bearer_when_both_are_sent() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let valid_jwt = testkeys::sign(&json!({
            "sub": f.user_id.to_string(),
            "exp": Utc::now().timestamp() + 600,
        }));
        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .insert_header((API_KEY_HEADER, "definitely-wrong"))
            .insert_header(("Authorization", format!("Bearer {}", valid_jwt)))
            .to_request();
        let res = test::call_service(&app, req).await;

        // the API-key path decided, despite a valid JWT on the request
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INVALID_API_KEY");
    }

    #[actix_web::test]
    async fn expired_jwt_returns_token_expired() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let token = testkeys::sign(&json!({
            "sub": f.user_id.to_string(),
            "exp": Utc::now().timestamp() - 600,
        }));
        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
    }

    #[actix_web::test]
    async fn jwt_without_subject_returns_invalid_jwt_claims() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let token = testkeys::sign(&json!({
            "exp": Utc::now().timestamp() + 600,
        }));
        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error"]["code"], "INVALID_JWT_CLAIMS");
    }

    #[actix_web::test]
    async fn malformed_org_claim_falls_back_to_stored_org() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let token = testkeys::sign(&json!({
            "sub": f.user_id.to_string(),
            "exp": Utc::now().timestamp() + 600,
            "organization_id": "not-a-uuid",
        }));
        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["data"]["auth_type"], "jwt");
        assert_eq!(body["data"]["organization_id"], f.org_id.to_string());
    }

    #[actix_web::test]
    async fn error_envelope_request_id_matches_response_header() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .to_request();
        let res = test::call_service(&app, req).await;

        let header_id = res
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .expect("request id header");
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["request_id"].as_str(), Some(header_id.as_str()));
    }

    #[actix_web::test]
    async fn unknown_user_jwt_provisions_an_organization() {
        let f = fixture();
        let app = protected_app!(f.pipeline.clone());

        let orphan = Uuid::new_v4();
        f.store.insert_user(UserRecord {
            id: orphan,
            email: "orphan@example.com".to_string(),
            role: "user".to_string(),
            plan: "free".to_string(),
            organization_id: None,
        });
        let token = testkeys::sign(&json!({
            "sub": orphan.to_string(),
            "exp": Utc::now().timestamp() + 600,
        }));
        let req = whoami_req()
            .insert_header((PROJECT_SCOPE_HEADER, SCOPE))
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        let org = body["data"]["organization_id"].as_str().unwrap();
        assert!(Uuid::parse_str(org).is_ok());
    }
}
