use crate::error::AppError;
use crate::models::auth_jwt_claims::Claims;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::{debug, error, info, trace};
use std::sync::OnceLock;

// Global static holder for the JWT verification key
static JWT_DECODING_KEY: OnceLock<DecodingKey> = OnceLock::new();

/// Initialize the JWT verification key from the configured secret.
/// This should be called once at application startup.
pub fn init_jwt_keys(jwt_secret_str: &str) -> Result<(), AppError> {
    info!("Initializing JWT keys from configuration");

    let decoding_key = DecodingKey::from_secret(jwt_secret_str.as_bytes());
    JWT_DECODING_KEY
        .set(decoding_key)
        .map_err(|_| AppError::Internal("JWT_DECODING_KEY was already initialized".to_string()))?;

    info!("JWT keys initialized successfully");
    Ok(())
}

/// Get the JWT verification key. Missing configuration is a server
/// fault, not a client authentication failure.
fn get_decoding_key() -> Result<&'static DecodingKey, AppError> {
    JWT_DECODING_KEY.get().ok_or_else(|| {
        AppError::JwtSecretMissing("JWT signing secret is not configured".to_string())
    })
}

/// Verify a JWT token (HS256 signature and expiry) and extract the claims.
pub fn verify_token(token: &str) -> Result<Claims, AppError> {
    trace!("Verifying JWT token");

    let decoding_key = get_decoding_key()?;

    // HS256 only; expiry is validated by default
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|err| {
        error!("JWT validation failed: {}", err);
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::TokenExpired("Token has expired".to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                AppError::InvalidJwt("Invalid token signature".to_string())
            }
            jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                AppError::InvalidJwt("Token not yet valid".to_string())
            }
            _ => AppError::InvalidJwt("Invalid token format".to_string()),
        }
    })?;

    debug!("JWT token verified successfully");
    Ok(token_data.claims)
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn valid_token_roundtrips_claims() {
        testkeys::init();
        let token = testkeys::sign(&json!({
            "sub": "7f3b2a10-0000-4000-8000-000000000001",
            "exp": Utc::now().timestamp() + 600,
            "role": "user",
        }));

        let claims = verify_token(&token).expect("token verifies");
        assert_eq!(claims.subject(), Some("7f3b2a10-0000-4000-8000-000000000001"));
        assert_eq!(claims.role.as_deref(), Some("user"));
    }

    #[test]
    fn expired_token_maps_to_token_expired() {
        testkeys::init();
        let token = testkeys::sign(&json!({
            "sub": "u1",
            "exp": Utc::now().timestamp() - 600,
        }));

        let err = verify_token(&token).unwrap_err();
        assert!(matches!(err, AppError::TokenExpired(_)));
    }

    #[test]
    fn garbage_token_maps_to_invalid_jwt() {
        testkeys::init();
        let err = verify_token("not.a.jwt").unwrap_err();
        assert!(matches!(err, AppError::InvalidJwt(_)));
    }

    #[test]
    fn wrong_signature_maps_to_invalid_jwt() {
        testkeys::init();
        let forged = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &json!({"sub": "u1", "exp": Utc::now().timestamp() + 600}),
            &jsonwebtoken::EncodingKey::from_secret(b"some-other-secret"),
        )
        .unwrap();

        let err = verify_token(&forged).unwrap_err();
        assert!(matches!(err, AppError::InvalidJwt(_)));
    }

    #[test]
    fn token_without_exp_is_rejected() {
        testkeys::init();
        let token = testkeys::sign(&json!({"sub": "u1"}));
        let err = verify_token(&token).unwrap_err();
        assert!(matches!(err, AppError::InvalidJwt(_)));
    }
}
