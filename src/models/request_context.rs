use actix_web::{dev::Payload, Error, FromRequest, HttpMessage, HttpRequest};
use chrono::{DateTime, Utc};
use std::future::{ready, Ready};
use uuid::Uuid;

/// Per-request correlation context created by the request tracer and
/// embedded in every response envelope.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub method: String,
}

impl RequestContext {
    pub fn new(request_id: Uuid, path: &str, method: &str) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }

    /// Read the tracer-installed context, or synthesize one so envelope
    /// builders never run without a request id.
    pub fn from_http_request(req: &HttpRequest) -> Self {
        if let Some(ctx) = req.extensions().get::<RequestContext>() {
            return ctx.clone();
        }
        Self::new(Uuid::new_v4(), req.path(), req.method().as_str())
    }
}

impl FromRequest for RequestContext {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(RequestContext::from_http_request(req)))
    }
}
