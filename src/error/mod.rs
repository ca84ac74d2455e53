use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

/// Gateway error taxonomy. Every variant maps to a stable
/// (status, type, code) triple consumed by the envelope builder.
#[derive(Debug, Clone)]
pub enum AppError {
    MissingAuth(String),
    InvalidApiKey(String),
    InvalidJwt(String),
    TokenExpired(String),
    InvalidJwtClaims(String),
    InvalidProjectScope(String),
    AuthenticationFailed(String),
    OriginNotAllowed(String),
    RateLimited(String),
    Forbidden(String),
    JwtSecretMissing(String),
    Configuration(String),
    Database(String),
    Conflict(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    code: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MissingAuth(e) => write!(f, "Missing credentials: {}", e),
            AppError::InvalidApiKey(e) => write!(f, "Invalid API key: {}", e),
            AppError::InvalidJwt(e) => write!(f, "Invalid token: {}", e),
            AppError::TokenExpired(e) => write!(f, "Token expired: {}", e),
            AppError::InvalidJwtClaims(e) => write!(f, "Invalid token claims: {}", e),
            AppError::InvalidProjectScope(e) => write!(f, "Invalid project scope: {}", e),
            AppError::AuthenticationFailed(e) => write!(f, "Authentication failed: {}", e),
            AppError::OriginNotAllowed(e) => write!(f, "Origin not allowed: {}", e),
            AppError::RateLimited(e) => write!(f, "Too many requests: {}", e),
            AppError::Forbidden(e) => write!(f, "Forbidden: {}", e),
            AppError::JwtSecretMissing(e) => write!(f, "JWT secret missing: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Conflict(e) => write!(f, "Conflict: {}", e),
            AppError::NotFound(e) => write!(f, "Not found: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl StdError for AppError {}

impl AppError {
    /// Error family reported in the envelope `type` field.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::MissingAuth(_)
            | AppError::InvalidApiKey(_)
            | AppError::InvalidJwt(_)
            | AppError::TokenExpired(_)
            | AppError::InvalidJwtClaims(_)
            | AppError::InvalidProjectScope(_)
            | AppError::AuthenticationFailed(_) => "AuthError",
            AppError::OriginNotAllowed(_) => "CORSError",
            AppError::RateLimited(_) => "RateLimitError",
            AppError::Forbidden(_) => "AuthorizationError",
            AppError::JwtSecretMissing(_) | AppError::Configuration(_) => "ConfigError",
            AppError::Conflict(_) => "ConflictError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::BadRequest(_) => "ValidationError",
            AppError::Database(_) | AppError::Internal(_) => "InternalError",
        }
    }

    /// Stable machine-readable code reported in the envelope `code` field.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::MissingAuth(_) => "MISSING_AUTH",
            AppError::InvalidApiKey(_) => "INVALID_API_KEY",
            AppError::InvalidJwt(_) => "INVALID_JWT",
            AppError::TokenExpired(_) => "TOKEN_EXPIRED",
            AppError::InvalidJwtClaims(_) => "INVALID_JWT_CLAIMS",
            AppError::InvalidProjectScope(_) => "INVALID_PROJECT_SCOPE",
            AppError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            AppError::OriginNotAllowed(_) => "ORIGIN_NOT_ALLOWED",
            AppError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::JwtSecretMissing(_) => "JWT_SECRET_MISSING",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Database(_) => "INTERNAL_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to the client. Internal faults keep their
    /// detail in server-side logs only.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            AppError::JwtSecretMissing(_) => {
                "Server authentication configuration error".to_string()
            }
            AppError::Configuration(_) => "Server configuration error".to_string(),
            AppError::MissingAuth(e)
            | AppError::InvalidApiKey(e)
            | AppError::InvalidJwt(e)
            | AppError::TokenExpired(e)
            | AppError::InvalidJwtClaims(e)
            | AppError::InvalidProjectScope(e)
            | AppError::AuthenticationFailed(e)
            | AppError::OriginNotAllowed(e)
            | AppError::RateLimited(e)
            | AppError::Forbidden(e)
            | AppError::Conflict(e)
            | AppError::NotFound(e)
            | AppError::BadRequest(e) => e.clone(),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        // Minimal body; the envelope error handler rewrites this with
        // full request context (request id, path, method).
        let error_response = ErrorResponse {
            message: self.client_message(),
            error_type: self.error_type().to_string(),
            code: self.error_code().to_string(),
        };

        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": error_response }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingAuth(_)
            | AppError::InvalidApiKey(_)
            | AppError::InvalidJwt(_)
            | AppError::TokenExpired(_)
            | AppError::InvalidJwtClaims(_)
            | AppError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidProjectScope(_)
            | AppError::OriginNotAllowed(_)
            | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::JwtSecretMissing(_)
            | AppError::Configuration(_)
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            _ => AppError::Database(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", error))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(error: redis::RedisError) -> Self {
        AppError::Internal(format!("Redis error: {}", error))
    }
}

// Define AppResult type alias for Result<T, AppError>
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            AppError::MissingAuth(String::new()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::InvalidProjectScope(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::RateLimited(String::new()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::JwtSecretMissing(String::new()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_never_reaches_the_client() {
        let err = AppError::Database("password authentication failed for role".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
