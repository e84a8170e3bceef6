use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::chat::models::{Conversation, Message, NewMessage};
use crate::common::error::ApiError;
use crate::common::helpers::truncate_chars;
use crate::common::id_generator::generate_message_id;

pub const DEFAULT_TITLE: &str = "New Chat";
const TITLE_MAX_CHARS: usize = 40;

/// Title for a new conversation, taken from its opening message
pub fn title_from(first_message: &str) -> String {
    let title = truncate_chars(first_message.trim(), TITLE_MAX_CHARS);
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}

fn not_found() -> ApiError {
    ApiError::NotFound("Conversation not found".to_string())
}

pub struct ConversationService {
    db: SqlitePool,
}

impl ConversationService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn find(&self, conversation_id: &str) -> Result<Option<Conversation>, ApiError> {
        sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Creates the conversation on first use, otherwise bumps `updated_at`
    ///
    /// A conversation id owned by another user is reported as not found.
    pub async fn ensure_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, ApiError> {
        if let Some(existing) = self.find(conversation_id).await? {
            if existing.user_id != user_id {
                warn!(
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    "Attempt to write to another user's conversation"
                );
                return Err(not_found());
            }

            sqlx::query(
                "UPDATE conversations SET updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now') WHERE id = ?",
            )
            .bind(conversation_id)
            .execute(&self.db)
            .await
            .map_err(ApiError::DatabaseError)?;

            return self.find(conversation_id).await?.ok_or_else(not_found);
        }

        let inserted = sqlx::query("INSERT INTO conversations (id, user_id, title) VALUES (?, ?, ?)")
            .bind(conversation_id)
            .bind(user_id)
            .bind(title)
            .execute(&self.db)
            .await;

        match inserted {
            Ok(_) => {
                info!(
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    "Conversation created"
                );
            }
            // Lost a race with a concurrent first message; fall through to the ownership check
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(conversation_id = %conversation_id, "Conversation created concurrently");
            }
            Err(e) => {
                error!(
                    error = %e,
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    "Database error creating conversation"
                );
                return Err(ApiError::DatabaseError(e));
            }
        }

        match self.find(conversation_id).await? {
            Some(conversation) if conversation.user_id == user_id => Ok(conversation),
            _ => Err(not_found()),
        }
    }

    /// Appends a message to a conversation the caller already owns
    pub async fn append_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, ApiError> {
        let message_id = generate_message_id();
        let tool_calls = message.tool_calls.as_ref().map(|v| v.to_string());
        let tool_result = message.tool_result.as_ref().map(|v| v.to_string());

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, user_id, role, content, tool_calls, tool_result) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message_id)
        .bind(conversation_id)
        .bind(user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(tool_calls)
        .bind(tool_result)
        .execute(&self.db)
        .await
        .map_err(|e| {
            error!(
                error = %e,
                user_id = %user_id,
                conversation_id = %conversation_id,
                message_id = %message_id,
                "Database error saving message"
            );
            ApiError::DatabaseError(e)
        })?;

        let stored = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(&message_id)
            .fetch_one(&self.db)
            .await
            .map_err(ApiError::DatabaseError)?;

        debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            role = %message.role,
            "Message saved"
        );

        Ok(stored)
    }

    /// Conversations of a user, most recently updated first
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, ApiError> {
        sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Messages of one of the user's conversations, oldest first
    pub async fn messages_for(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = ? AND user_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Deletes a conversation and, by cascade, its messages; false when missing or not owned
    pub async fn delete(&self, user_id: &str, conversation_id: &str) -> Result<bool, ApiError> {
        let deleted = sqlx::query("DELETE FROM conversations WHERE id = ? AND user_id = ?")
            .bind(conversation_id)
            .bind(user_id)
            .execute(&self.db)
            .await
            .map_err(ApiError::DatabaseError)?;

        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        info!(
            user_id = %user_id,
            conversation_id = %conversation_id,
            "Conversation deleted"
        );

        Ok(true)
    }
}
