//! Tests for chat module
//!
//! Conversation persistence, ownership rules and request validation.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;
    use sqlx::SqlitePool;

    use crate::chat::models::{ChatRequest, MessageRole, NewMessage};
    use crate::chat::services::conversation_service::{title_from, DEFAULT_TITLE};
    use crate::chat::services::ConversationService;
    use crate::chat::validators::{validate_chat_request, MISSING_FIELDS_MESSAGE};
    use crate::common::migrations::tests::setup_test_db;
    use crate::common::ApiError;

    async fn setup() -> (SqlitePool, ConversationService) {
        let pool = setup_test_db().await;
        for (id, email) in [("U_ada", "ada@example.com"), ("U_bob", "bob@example.com")] {
            sqlx::query("INSERT INTO users (id, email) VALUES (?, ?)")
                .bind(id)
                .bind(email)
                .execute(&pool)
                .await
                .unwrap();
        }
        let service = ConversationService::new(pool.clone());
        (pool, service)
    }

    fn request(body: serde_json::Value) -> ChatRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_title_from_first_message() {
        assert_eq!(title_from("What's the weather in Paris?"), "What's the weather in Paris?");
        let long = "Tell me everything about the next Formula 1 race weekend please";
        assert_eq!(title_from(long).chars().count(), 40);
        assert_eq!(title_from("   "), DEFAULT_TITLE);
    }

    #[test]
    fn test_content_text() {
        let req = request(json!({
            "conversationId": "c-1",
            "messages": [
                { "role": "user", "content": "plain" },
                { "role": "user", "content": [{ "type": "text", "text": "parts" }] }
            ]
        }));
        assert_eq!(req.messages[0].content_text(), "plain");
        assert_eq!(
            req.messages[1].content_text(),
            r#"[{"text":"parts","type":"text"}]"#
        );
    }

    #[test]
    fn test_validate_chat_request() {
        let ok = request(json!({
            "conversationId": " c-1 ",
            "messages": [{ "role": "user", "content": "hi" }]
        }));
        assert_eq!(validate_chat_request(&ok).unwrap(), "c-1");

        let missing_id = request(json!({ "messages": [{ "role": "user", "content": "hi" }] }));
        match validate_chat_request(&missing_id) {
            Err(ApiError::BadRequest(msg)) => assert_eq!(msg, MISSING_FIELDS_MESSAGE),
            other => panic!("unexpected result: {:?}", other),
        }

        let no_messages = request(json!({ "conversationId": "c-1", "messages": [] }));
        assert!(matches!(
            validate_chat_request(&no_messages),
            Err(ApiError::BadRequest(_))
        ));

        let bad_role = request(json!({
            "conversationId": "c-1",
            "messages": [{ "role": "wizard", "content": "hi" }]
        }));
        assert!(matches!(
            validate_chat_request(&bad_role),
            Err(ApiError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_conversation_creates_then_touches() {
        let (_pool, service) = setup().await;

        let created = service
            .ensure_conversation("U_ada", "c-1", "Weather in Paris")
            .await
            .unwrap();
        assert_eq!(created.title.as_deref(), Some("Weather in Paris"));

        let touched = service
            .ensure_conversation("U_ada", "c-1", "A different title")
            .await
            .unwrap();
        assert_eq!(touched.title.as_deref(), Some("Weather in Paris"));
        assert!(touched.updated_at >= created.updated_at);
        assert_eq!(touched.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_foreign_conversation_is_hidden() {
        let (pool, service) = setup().await;
        service
            .ensure_conversation("U_ada", "c-1", "Ada's chat")
            .await
            .unwrap();

        let err = service
            .ensure_conversation("U_bob", "c-1", "Bob's chat")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let (owner,): (String,) = sqlx::query_as("SELECT user_id FROM conversations WHERE id = 'c-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(owner, "U_ada");
    }

    #[tokio::test]
    async fn test_messages_are_ordered_and_scoped() {
        let (_pool, service) = setup().await;
        service.ensure_conversation("U_ada", "c-1", "t").await.unwrap();

        service
            .append_message("U_ada", "c-1", NewMessage::text(MessageRole::User, "Stock price of AAPL?"))
            .await
            .unwrap();
        service
            .append_message(
                "U_ada",
                "c-1",
                NewMessage {
                    role: MessageRole::Assistant,
                    content: String::new(),
                    tool_calls: Some(json!([{ "id": "call_1", "name": "getStockPrice", "arguments": "{\"symbol\":\"AAPL\"}" }])),
                    tool_result: None,
                },
            )
            .await
            .unwrap();
        service
            .append_message(
                "U_ada",
                "c-1",
                NewMessage {
                    role: MessageRole::Tool,
                    content: "{\"close\":189.5}".to_string(),
                    tool_calls: None,
                    tool_result: Some(json!({ "toolCallId": "call_1", "output": { "close": 189.5 } })),
                },
            )
            .await
            .unwrap();

        let messages = service.messages_for("U_ada", "c-1").await.unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool"]);

        let json = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(json["conversationId"], "c-1");
        assert_eq!(json["toolCalls"][0]["name"], "getStockPrice");
        assert!(json["toolResult"].is_null());

        let tool = serde_json::to_value(&messages[2]).unwrap();
        assert_eq!(tool["toolResult"]["output"]["close"], 189.5);

        assert!(service.messages_for("U_bob", "c-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_by_most_recent_update() {
        let (_pool, service) = setup().await;
        service.ensure_conversation("U_ada", "c-old", "old").await.unwrap();
        service.ensure_conversation("U_ada", "c-new", "new").await.unwrap();
        service.ensure_conversation("U_bob", "c-bob", "bob").await.unwrap();

        let listed = service.list_for_user("U_ada").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-new", "c-old"]);

        // Writing to the older conversation moves it to the top
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        service.ensure_conversation("U_ada", "c-old", "old").await.unwrap();
        let listed = service.list_for_user("U_ada").await.unwrap();
        assert_eq!(listed[0].id, "c-old");
    }

    #[tokio::test]
    async fn test_delete_is_owner_scoped() {
        let (pool, service) = setup().await;
        service.ensure_conversation("U_ada", "c-1", "t").await.unwrap();
        service
            .append_message("U_ada", "c-1", NewMessage::text(MessageRole::User, "hello"))
            .await
            .unwrap();

        assert!(!service.delete("U_bob", "c-1").await.unwrap());
        assert!(!service.delete("U_ada", "c-missing").await.unwrap());
        assert!(service.delete("U_ada", "c-1").await.unwrap());

        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(service.list_for_user("U_ada").await.unwrap().is_empty());
    }
}
