//! Role and plan authorization guards for protected route groups.
//!
//! Allowlist membership checks against the identity the auth stage
//! resolved. Failures name the required set and the actual value so a
//! caller can tell exactly why they were refused.

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::api_contract::envelope;
use crate::error::AppError;
use crate::models::{AuthenticatedIdentity, RequestContext};

/// Guard on `identity.role`.
pub fn require_role(roles: &[&str]) -> RequireRole {
    RequireRole {
        allowed: Arc::new(roles.iter().map(|r| r.to_string()).collect()),
    }
}

/// Admin-only routes. `is_admin` is derived from the role metadata.
pub fn require_admin() -> RequireRole {
    require_role(&["admin"])
}

/// Guard on `identity.plan`.
pub fn require_plan(plans: &[&str]) -> RequirePlan {
    RequirePlan {
        allowed: Arc::new(plans.iter().map(|p| p.to_string()).collect()),
    }
}

fn reject<B>(req: ServiceRequest, err: AppError) -> ServiceResponse<EitherBody<B>> {
    let (request, _) = req.into_parts();
    let ctx = RequestContext::from_http_request(&request);
    let response = envelope::error_response(&ctx, &err);
    ServiceResponse::new(request, response).map_into_right_body()
}

#[derive(Clone)]
pub struct RequireRole {
    allowed: Arc<Vec<String>>,
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequireRoleService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequireRoleService {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        })
    }
}

pub struct RequireRoleService<S> {
    service: Rc<S>,
    allowed: Arc<Vec<String>>,
}

impl<S, B> Service<ServiceRequest> for RequireRoleService<S>
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
        let allowed = self.allowed.clone();

        Box::pin(async move {
            if req.method() == Method::OPTIONS {
                return service.call(req).await.map(|res| res.map_into_left_body());
            }

            let identity = req.extensions().get::<AuthenticatedIdentity>().cloned();
            match identity {
                Some(identity) if allowed.iter().any(|r| r == &identity.role) => {
                    service.call(req).await.map(|res| res.map_into_left_body())
                }
                Some(identity) => {
                    warn!(
                        "role check failed for user {} on {}: has '{}', needs one of [{}]",
                        identity.user_id,
                        req.path(),
                        identity.role,
                        allowed.join(", ")
                    );
                    Ok(reject(
                        req,
                        AppError::Forbidden(format!(
                            "Access requires role in [{}]; current role is '{}'",
                            allowed.join(", "),
                            identity.role
                        )),
                    ))
                }
                None => Ok(reject(
                    req,
                    AppError::AuthenticationFailed(
                        "Authentication context missing".to_string(),
                    ),
                )),
            }
        })
    }
}

#[derive(Clone)]
pub struct RequirePlan {
    allowed: Arc<Vec<String>>,
}

impl<S, B> Transform<S, ServiceRequest> for RequirePlan
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequirePlanService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequirePlanService {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        })
    }
}

pub struct RequirePlanService<S> {
    service: Rc<S>,
    allowed: Arc<Vec<String>>,
}

impl<S, B> Service<ServiceRequest> for RequirePlanService<S>
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
        let allowed = self.allowed.clone();

        Box::pin(async move {
            if req.method() == Method::OPTIONS {
                return service.call(req).await.map(|res| res.map_into_left_body());
            }

            let identity = req.extensions().get::<AuthenticatedIdentity>().cloned();
            match identity {
                Some(identity) if allowed.iter().any(|p| p == &identity.plan) => {
                    service.call(req).await.map(|res| res.map_into_left_body())
                }
                Some(identity) => {
                    warn!(
                        "plan check failed for user {} on {}: has '{}', needs one of [{}]",
                        identity.user_id,
                        req.path(),
                        identity.plan,
                        allowed.join(", ")
                    );
                    Ok(reject(
                        req,
                        AppError::Forbidden(format!(
                            "Access requires plan in [{}]; current plan is '{}'",
                            allowed.join(", "),
                            identity.plan
                        )),
                    ))
                }
                None => Ok(reject(
                    req,
                    AppError::AuthenticationFailed(
                        "Authentication context missing".to_string(),
                    ),
                )),
            }
        })
    }
}
