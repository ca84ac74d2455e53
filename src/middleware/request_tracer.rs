//! Request tracing middleware.
//!
//! Assigns (or propagates) a request id, installs the `RequestContext`
//! every later stage and envelope builder reads, and stamps the id back
//! onto the response as `X-Request-ID`. This stage has no failure mode.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::debug;
use std::rc::Rc;
use std::task::{Context, Poll};
use uuid::Uuid;

use crate::models::RequestContext;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Extracts the client IP address. Relies on the immediate upstream
/// proxy setting X-Forwarded-For or X-Real-IP; the first entry in
/// X-Forwarded-For is the original client.
pub fn extract_client_ip(req: &ServiceRequest) -> String {
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded_for.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(real_ip_str) = real_ip.to_str() {
            return real_ip_str.to_string();
        }
    }

    if let Some(peer_addr) = req.peer_addr() {
        peer_addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}

pub struct RequestTracer;

impl<S, B> Transform<S, ServiceRequest> for RequestTracer
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestTracerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestTracerService {
            service: Rc::new(service),
        })
    }
}

pub struct RequestTracerService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestTracerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        // propagate a caller-supplied id only when it is a well-formed UUID
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .unwrap_or_else(Uuid::new_v4);

        let ctx = RequestContext::new(request_id, req.path(), req.method().as_str());
        debug!(
            "{} {} from {} (request: {})",
            ctx.method,
            ctx.path,
            extract_client_ip(&req),
            request_id
        );
        req.extensions_mut().insert(ctx);

        Box::pin(async move {
            let mut res = service.call(req).await?;

            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                res.headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            Ok(res)
        })
    }
}
