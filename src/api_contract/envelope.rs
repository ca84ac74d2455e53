//! Uniform response framing.
//!
//! Every body leaving the service is one of two shapes:
//! success `{data, request_id, timestamp, meta?}` or error
//! `{error: {message, type, code}, request_id, timestamp, path, method}`.
//! The global handler at the bottom catches anything that escapes the
//! pipeline and rewrites it into the error shape without leaking
//! internals.

use actix_web::dev::ServiceResponse;
use actix_web::middleware::ErrorHandlerResponse;
use actix_web::{HttpMessage, HttpResponse, ResponseError};
use chrono::Utc;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AuthenticatedIdentity, RequestContext};

#[derive(Serialize)]
pub struct SuccessEnvelope<T: Serialize> {
    pub data: T,
    pub request_id: Uuid,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub request_id: Uuid,
    pub timestamp: String,
    pub path: String,
    pub method: String,
}

pub fn success<T: Serialize>(ctx: &RequestContext, data: T) -> HttpResponse {
    HttpResponse::Ok().json(SuccessEnvelope {
        data,
        request_id: ctx.request_id,
        timestamp: Utc::now().to_rfc3339(),
        meta: None,
    })
}

pub fn success_with_meta<T: Serialize>(ctx: &RequestContext, data: T, meta: Value) -> HttpResponse {
    HttpResponse::Ok().json(SuccessEnvelope {
        data,
        request_id: ctx.request_id,
        timestamp: Utc::now().to_rfc3339(),
        meta: Some(meta),
    })
}

/// Full error envelope for a known gateway error.
pub fn error_response(ctx: &RequestContext, err: &AppError) -> HttpResponse {
    HttpResponse::build(err.status_code()).json(ErrorEnvelope {
        error: ErrorBody {
            message: err.client_message(),
            error_type: err.error_type().to_string(),
            code: err.error_code().to_string(),
        },
        request_id: ctx.request_id,
        timestamp: Utc::now().to_rfc3339(),
        path: ctx.path.clone(),
        method: ctx.method.clone(),
    })
}

/// Global error handler for `actix_web::middleware::ErrorHandlers`.
///
/// Responses produced from an `AppError` are rewritten into the full
/// envelope with request context. Foreign errors (extractor failures,
/// panics surfaced as 500s) get a generic envelope; server faults never
/// expose their message to the client.
pub fn render_error_envelope<B>(
    res: ServiceResponse<B>,
) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let app_error = res
        .response()
        .error()
        .and_then(|e| e.as_error::<AppError>())
        .cloned();

    match app_error {
        Some(err) => {
            let (req, _) = res.into_parts();
            let ctx = RequestContext::from_http_request(&req);
            let user_id = req
                .extensions()
                .get::<AuthenticatedIdentity>()
                .map(|i| i.user_id.to_string())
                .unwrap_or_else(|| "-".to_string());
            error!(
                "request {} failed: {} ({} {}, user {})",
                ctx.request_id, err, ctx.method, ctx.path, user_id
            );

            let response = error_response(&ctx, &err);
            Ok(ErrorHandlerResponse::Response(
                ServiceResponse::new(req, response).map_into_right_body(),
            ))
        }
        None if res.response().error().is_some() => {
            let status = res.status();
            let detail = res
                .response()
                .error()
                .map(|e| e.to_string())
                .unwrap_or_default();
            let (req, _) = res.into_parts();
            let ctx = RequestContext::from_http_request(&req);
            error!(
                "request {} failed with unhandled error: {} ({} {})",
                ctx.request_id, detail, ctx.method, ctx.path
            );

            let err = if status.is_server_error() {
                AppError::Internal(detail)
            } else {
                AppError::BadRequest(detail)
            };
            let response = HttpResponse::build(status).json(ErrorEnvelope {
                error: ErrorBody {
                    message: err.client_message(),
                    error_type: err.error_type().to_string(),
                    code: err.error_code().to_string(),
                },
                request_id: ctx.request_id,
                timestamp: Utc::now().to_rfc3339(),
                path: ctx.path.clone(),
                method: ctx.method.clone(),
            });
            Ok(ErrorHandlerResponse::Response(
                ServiceResponse::new(req, response).map_into_right_body(),
            ))
        }
        // already-framed responses (middleware envelopes, 404 handler)
        None => Ok(ErrorHandlerResponse::Response(res.map_into_left_body())),
    }
}
