// Application state shared across all modules

use sqlx::SqlitePool;
use std::sync::Arc;

use super::config::AppConfig;
use crate::auth::identity_store::IdentityStore;
use crate::auth::providers::ProviderRegistry;
use crate::auth::resolver::IdentityResolver;
use crate::auth::session::SessionStore;
use crate::chat::services::ConversationService;
use crate::services::{LlmService, ToolService};

/// Application state containing database pool, services, and configuration
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionStore>,
    pub identity_store: Arc<dyn IdentityStore>,
    pub resolver: Arc<IdentityResolver>,
    pub providers: Arc<ProviderRegistry>,
    pub llm_service: Arc<LlmService>,
    pub tool_service: Arc<ToolService>,
    pub conversation_service: Arc<ConversationService>,
}
