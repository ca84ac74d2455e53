use actix_web::{middleware::ErrorHandlers, middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;

use memocore_server::api_contract::envelope::render_error_envelope;
use memocore_server::config::AppSettings;
use memocore_server::db::connection::{create_pool, verify_connection};
use memocore_server::db::repositories::{
    ApiKeyRepository, OrganizationRepository, UserRepository,
};
use memocore_server::handlers::health::health_check;
use memocore_server::middleware::{CorsGuard, RateLimitMiddleware, RequestTracer, UnifiedAuth};
use memocore_server::routes::{configure_api_routes, not_found};
use memocore_server::services::auth::{jwt, AuthPipeline, AuthStores};
use memocore_server::stores::memory::{start_counter_cleanup_task, MemoryCounterStore};
use memocore_server::stores::redis_counter::RedisCounterStore;
use memocore_server::stores::RateCounterStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    // Initialize JWT verification keys
    if let Err(e) = jwt::init_jwt_keys(&app_settings.auth.jwt_secret) {
        log::error!("Failed to initialize JWT keys: {}", e);
        log::error!("Cannot start server without working JWT keys");
        std::process::exit(1);
    }

    // Database connection setup
    let db_pool = match create_pool(&app_settings.database.url).await {
        Ok(pool) => {
            if let Err(e) = verify_connection(&pool).await {
                log::error!("Database connection verification failed: {}", e);
                log::error!("Cannot start server without a working database connection");
                std::process::exit(1);
            }
            log::info!("Database connection established successfully");
            pool
        }
        Err(e) => {
            log::error!("Failed to create database connection pool: {}", e);
            log::error!("Cannot start server without a working database connection");
            std::process::exit(1);
        }
    };

    // Credential stores backed by Postgres
    let auth_stores = AuthStores {
        api_keys: Arc::new(ApiKeyRepository::new(db_pool.clone())),
        users: Arc::new(UserRepository::new(db_pool.clone())),
        organizations: Arc::new(OrganizationRepository::new(db_pool.clone())),
    };

    // Rate-limit counter store: shared Redis when configured, otherwise a
    // process-local map whose counters do not survive restarts
    let counter_store: Arc<dyn RateCounterStore> = match &app_settings.rate_limit.redis_url {
        Some(url) => {
            match RedisCounterStore::connect(url, &app_settings.rate_limit.redis_key_prefix).await
            {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    log::error!("Failed to connect to Redis for rate limiting: {}", e);
                    log::error!("Unset REDIS_URL to fall back to in-memory counters");
                    std::process::exit(1);
                }
            }
        }
        None => {
            log::warn!(
                "REDIS_URL not set; rate limit counters are process-local and best-effort only"
            );
            let store = Arc::new(MemoryCounterStore::new());
            start_counter_cleanup_task(store.clone(), 300);
            store
        }
    };

    // One shared authentication pipeline for every host adapter
    let auth_pipeline = Arc::new(AuthPipeline::new(
        auth_stores,
        app_settings.auth.project_scope.clone(),
        app_settings.auth.store_timeout_ms,
    ));

    let host = app_settings.server.host.clone();
    let port = app_settings.server.port;
    log::info!("Starting server at http://{}:{}", host, port);

    let listener = TcpListener::bind(format!("{}:{}", host, port))?;

    HttpServer::new(move || {
        let app_settings = app_settings.clone();
        let auth_pipeline = auth_pipeline.clone();
        let counter_store = counter_store.clone();

        App::new()
            .app_data(web::Data::new(app_settings.clone()))
            .app_data(web::Data::new(db_pool.clone()))
            // Public health endpoint (no auth)
            .route("/health", web::get().to(health_check))
            // Protected API surface
            .service(
                web::scope("/api/v1")
                    .wrap(RateLimitMiddleware::new(
                        app_settings.rate_limit.clone(),
                        app_settings.auth.project_scope.clone(),
                        counter_store,
                    ))
                    .wrap(UnifiedAuth::new(auth_pipeline))
                    .configure(configure_api_routes),
            )
            .default_service(web::route().to(not_found))
            // Outermost last: tracer -> CORS guard -> envelope handler
            .wrap(ErrorHandlers::new().default_handler(render_error_envelope))
            .wrap(CorsGuard::new(&app_settings.server.cors_origins))
            .wrap(RequestTracer)
            .wrap(Logger::default())
    })
    .listen(listener)?
    .run()
    .await
}
