// src/main.rs
use axum::{
    extract::Extension,
    http::{header, HeaderName, HeaderValue, Method},
    middleware, Router,
};
use dotenv::dotenv;
use reqwest::Client;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::time::Duration;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod auth;
mod chat;
mod common;
mod health;
mod logging_middleware;
mod services;

// ============================================================================
// COMMON IMPORTS
// ============================================================================

use auth::providers::ProviderRegistry;
use auth::resolver::IdentityResolver;
use auth::session::SessionStore;
use auth::{IdentityStore, SqliteIdentityStore};
use chat::services::ConversationService;
use common::config::ConfigError;
use common::{AppConfig, AppState};
use services::{LlmService, ToolService};

const CORS_MAX_AGE_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(ConfigError::Invalid(problems)) => {
            error!("❌ Invalid environment variables:");
            for problem in &problems {
                error!("   • {}", problem);
            }
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    info!(
        environment = %config.environment,
        port = config.port,
        frontend_url = %config.frontend_url,
        model = %config.llm.model,
        "Configuration loaded"
    );

    // ========================================================================
    // DATABASE SETUP
    // ========================================================================

    if let Some(path_part) = config.database_url.strip_prefix("sqlite://") {
        let path_without_params = path_part.split('?').next().unwrap_or("");
        if !path_without_params.is_empty() && !path_without_params.starts_with(':') {
            let db_path = PathBuf::from(path_without_params);
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }

    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await?;

    // Run database migrations
    if config.reset_db && config.environment.is_production() {
        warn!("RESET_DB is set in production; all data will be dropped");
    }
    common::migrations::run_migrations(&pool, config.reset_db).await?;

    // ========================================================================
    // SERVICE INITIALIZATION
    // ========================================================================

    let http_client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let sessions = Arc::new(SessionStore::new(
        pool.clone(),
        config.session_secret.clone(),
    ));
    SessionStore::start_cleanup_task(sessions.clone());
    info!("Session store initialized, cleanup task started");

    let identity_store: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(pool.clone()));
    let resolver = Arc::new(IdentityResolver::new(identity_store.clone()));
    let providers = Arc::new(ProviderRegistry::from_config(&config, &http_client));
    info!("OAuth providers initialized");

    let llm_service = Arc::new(LlmService::new(http_client.clone(), config.llm.clone()));
    info!(model = %llm_service.model(), "LlmService initialized");

    let tool_service = Arc::new(ToolService::new(http_client, config.tools.clone()));
    info!("ToolService initialized");

    let conversation_service = Arc::new(ConversationService::new(pool.clone()));

    // ========================================================================
    // APPLICATION STATE
    // ========================================================================

    let app_state = AppState {
        db: pool,
        config: config.clone(),
        sessions,
        identity_store,
        resolver,
        providers,
        llm_service,
        tool_service,
        conversation_service,
    };

    let shared = Arc::new(RwLock::new(app_state));

    // ========================================================================
    // ROUTER COMPOSITION
    // ========================================================================

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let app = Router::new()
        // Banner, health and DB probe
        .merge(health::health_routes())
        // Sign-in, session and account linking
        .merge(auth::auth_routes())
        // Model proxy and conversation history
        .merge(chat::chat_routes())
        .fallback(health::not_found)
        // ====================================================================
        // MIDDLEWARE AND LAYERS
        // ====================================================================
        .layer(middleware::from_fn(logging_middleware::log_requests))
        .layer(Extension(shared))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .expose_headers([HeaderName::from_static("set-cookie")])
                .allow_credentials(true)
                .max_age(Duration::from_secs(CORS_MAX_AGE_SECS)),
        )
        .layer(TraceLayer::new_for_http());

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("🚀 Listening on {}", addr);
    info!("   Backend URL: {}", config.backend_url);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
