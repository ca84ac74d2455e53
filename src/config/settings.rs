use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Fixed tenant label every request must present in `X-Project-Scope`.
    pub project_scope: String,
    /// Upper bound on any single credential/organization store call.
    pub store_timeout_ms: u64,
}

/// One plan tier of the fixed-window rate limiter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub max_requests: u64,
    pub window_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub free: RateLimitTier,
    pub pro: RateLimitTier,
    pub enterprise: RateLimitTier,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
}

impl RateLimitConfig {
    /// Authoritative plan-to-tier mapping. Unknown plans get the free tier.
    pub fn tier_for_plan(&self, plan: &str) -> &RateLimitTier {
        match plan {
            "pro" => &self.pro,
            "enterprise" => &self.enterprise,
            _ => &self.free,
        }
    }
}

const DEFAULT_WINDOW_MS: u64 = 60_000;

fn tier_from_env(prefix: &str, default_max: u64) -> Result<RateLimitTier, AppError> {
    let max_requests = env::var(format!("RATE_LIMIT_{}_MAX_REQUESTS", prefix))
        .unwrap_or_else(|_| default_max.to_string())
        .parse::<u64>()
        .map_err(|_| {
            AppError::Configuration(format!(
                "RATE_LIMIT_{}_MAX_REQUESTS must be a valid number",
                prefix
            ))
        })?;

    let window_ms = env::var("RATE_LIMIT_WINDOW_MS")
        .unwrap_or_else(|_| DEFAULT_WINDOW_MS.to_string())
        .parse::<u64>()
        .map_err(|_| {
            AppError::Configuration("RATE_LIMIT_WINDOW_MS must be a valid number".to_string())
        })?;

    Ok(RateLimitTier {
        max_requests,
        window_ms,
    })
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        // App config
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "memocore".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Database config
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Configuration("DATABASE_URL must be set".to_string()))?;

        // Server config
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| {
                AppError::Configuration("SERVER_PORT must be a valid port number".to_string())
            })?;

        // CORS origins (development defaults are appended by the CORS guard)
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Auth config
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Configuration("JWT_SECRET must be set".to_string()))?;

        let project_scope = env::var("PROJECT_SCOPE").unwrap_or_else(|_| "memocore".to_string());

        let store_timeout_ms = env::var("AUTH_STORE_TIMEOUT_MS")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration("AUTH_STORE_TIMEOUT_MS must be a valid number".to_string())
            })?;

        // Rate limiting: 60 / 300 / 1000 requests per window per plan
        let rate_limit = RateLimitConfig {
            free: tier_from_env("FREE", 60)?,
            pro: tier_from_env("PRO", 300)?,
            enterprise: tier_from_env("ENTERPRISE", 1000)?,
            redis_url: env::var("REDIS_URL").ok(),
            redis_key_prefix: env::var("RATE_LIMIT_REDIS_PREFIX")
                .unwrap_or_else(|_| app_name.clone()),
        };

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            database: DatabaseConfig { url: database_url },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
            },
            auth: AuthConfig {
                jwt_secret,
                project_scope,
                store_timeout_ms,
            },
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> RateLimitConfig {
        RateLimitConfig {
            free: RateLimitTier {
                max_requests: 60,
                window_ms: 60_000,
            },
            pro: RateLimitTier {
                max_requests: 300,
                window_ms: 60_000,
            },
            enterprise: RateLimitTier {
                max_requests: 1000,
                window_ms: 60_000,
            },
            redis_url: None,
            redis_key_prefix: "memocore".to_string(),
        }
    }

    #[test]
    fn known_plans_map_to_their_tier() {
        let cfg = tiers();
        assert_eq!(cfg.tier_for_plan("free").max_requests, 60);
        assert_eq!(cfg.tier_for_plan("pro").max_requests, 300);
        assert_eq!(cfg.tier_for_plan("enterprise").max_requests, 1000);
    }

    #[test]
    fn unknown_plans_fall_back_to_free() {
        let cfg = tiers();
        assert_eq!(cfg.tier_for_plan("trial-2019").max_requests, 60);
        assert_eq!(cfg.tier_for_plan("").max_requests, 60);
    }
}
