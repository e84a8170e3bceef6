use crate::chat::handlers;
use axum::{
    routing::{get, post},
    Router,
};

pub fn chat_routes() -> Router {
    Router::new()
        .route("/api/chat/message", post(handlers::send_message))
        .route("/api/chat/conversations", get(handlers::list_conversations))
        .route(
            "/api/chat/conversation/:id",
            get(handlers::get_conversation).delete(handlers::delete_conversation),
        )
}
