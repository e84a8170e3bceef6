//! Chat handlers: model proxy and conversation history

use axum::{
    body::Body,
    extract::{Extension, Json, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::models::{ChatRequest, Conversation, Message, MessageRole, NewMessage};
use super::services::conversation_service::title_from;
use super::services::ConversationService;
use super::validators::validate_chat_request;
use crate::auth::AuthedUser;
use crate::common::{safe_email_log, ApiError, AppState};
use crate::services::llm::{
    ChatMessage, DeltaStream, LlmDelta, LlmError, ToolCallAccumulator, SYSTEM_PROMPT,
};

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const STREAM_BUFFER: usize = 32;

/// Where the messages of one chat turn are recorded
#[derive(Clone)]
struct ChatTurn {
    conversations: Arc<ConversationService>,
    user_id: String,
    conversation_id: String,
}

impl ChatTurn {
    /// Saves a message produced after the response has started; failures are only logged
    async fn record(&self, message: NewMessage) {
        let role = message.role;
        if let Err(e) = self
            .conversations
            .append_message(&self.user_id, &self.conversation_id, message)
            .await
        {
            error!(
                error = %e,
                conversation_id = %self.conversation_id,
                role = %role,
                "Failed to save chat message"
            );
        }
    }
}

/// How the model opened its answer
enum Opening {
    Text(String),
    ToolCalls(ToolCallAccumulator),
    Empty,
}

/// Reads deltas until the model commits to text or to tool calls
///
/// Leading whitespace is held back so a model that emits a newline before its
/// tool call is still treated as a tool call.
async fn read_opening(deltas: &mut DeltaStream) -> Result<Opening, LlmError> {
    let mut held = String::new();

    while let Some(delta) = deltas.next().await {
        match delta? {
            LlmDelta::Text(text) => {
                held.push_str(&text);
                if !held.trim().is_empty() {
                    return Ok(Opening::Text(held));
                }
            }
            LlmDelta::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let mut calls = ToolCallAccumulator::default();
                calls.push(index, id, name, &arguments);
                return Ok(Opening::ToolCalls(calls));
            }
            LlmDelta::Finish(_) => {}
        }
    }

    if held.is_empty() {
        Ok(Opening::Empty)
    } else {
        Ok(Opening::Text(held))
    }
}

fn text_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response()
}

/// Streams the model's text to the client and saves the full answer once it ends
fn stream_text(turn: ChatTurn, opening: String, mut deltas: DeltaStream) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(STREAM_BUFFER);

    tokio::spawn(async move {
        let mut answer = opening.clone();
        let mut client_connected = tx.send(Ok(Bytes::from(opening))).await.is_ok();
        let mut dropped_tool_calls = false;

        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(LlmDelta::Text(text)) => {
                    answer.push_str(&text);
                    if client_connected && tx.send(Ok(Bytes::from(text))).await.is_err() {
                        debug!(conversation_id = %turn.conversation_id, "Client went away mid-stream");
                        client_connected = false;
                    }
                }
                Ok(LlmDelta::ToolCall { .. }) => dropped_tool_calls = true,
                Ok(LlmDelta::Finish(_)) => {}
                Err(e) => {
                    error!(error = %e, conversation_id = %turn.conversation_id, "Model stream failed");
                    let _ = tx
                        .send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())))
                        .await;
                    break;
                }
            }
        }
        drop(tx);

        if dropped_tool_calls {
            warn!(
                conversation_id = %turn.conversation_id,
                "Ignored tool calls that arrived after streamed text"
            );
        }

        turn.record(NewMessage::text(MessageRole::Assistant, answer)).await;
        info!(conversation_id = %turn.conversation_id, "💬 Streamed chat answer");
    });

    text_response(Body::from_stream(ReceiverStream::new(rx)))
}

/// Drains the rest of the answer, runs the requested tools and returns their output
async fn answer_with_tools(
    state: &AppState,
    turn: &ChatTurn,
    mut calls: ToolCallAccumulator,
    mut deltas: DeltaStream,
) -> Result<Response, ApiError> {
    let mut text = String::new();

    while let Some(delta) = deltas.next().await {
        match delta? {
            LlmDelta::Text(t) => text.push_str(&t),
            LlmDelta::ToolCall {
                index,
                id,
                name,
                arguments,
            } => calls.push(index, id, name, &arguments),
            LlmDelta::Finish(_) => {}
        }
    }

    let calls = calls.finish();
    if calls.is_empty() {
        warn!(conversation_id = %turn.conversation_id, "Model sent tool call fragments without a tool name");
        if !text.is_empty() {
            turn.record(NewMessage::text(MessageRole::Assistant, text.clone()))
                .await;
        }
        return Ok(text_response(Body::from(text)));
    }

    let mut outputs = Vec::with_capacity(calls.len());
    for call in &calls {
        outputs.push(state.tool_service.execute(&call.name, &call.arguments).await);
    }

    turn.record(NewMessage {
        role: MessageRole::Assistant,
        content: text,
        tool_calls: Some(json!(calls)),
        tool_result: None,
    })
    .await;

    for (call, output) in calls.iter().zip(&outputs) {
        let content = match output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        turn.record(NewMessage {
            role: MessageRole::Tool,
            content,
            tool_calls: None,
            tool_result: Some(json!({
                "toolCallId": call.id,
                "toolName": call.name,
                "output": output,
            })),
        })
        .await;
    }

    info!(
        conversation_id = %turn.conversation_id,
        tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "🛠️ Answered with tool output"
    );

    let body = match outputs.len() {
        1 => outputs.remove(0),
        _ => Value::Array(outputs),
    };
    Ok(Json(body).into_response())
}

/// POST /api/chat/message
///
/// # Request Body
/// ```json
/// { "messages": [{ "role": "user", "content": "Weather in Paris?" }], "conversationId": "c-123" }
/// ```
///
/// Responds with streamed `text/plain` when the model answers in prose, or
/// with the tool output as JSON when the model calls tools.
pub async fn send_message(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();
    let conversation_id = validate_chat_request(&payload)?;

    let first_text = payload
        .messages
        .first()
        .map(|m| m.content_text())
        .unwrap_or_default();
    state
        .conversation_service
        .ensure_conversation(&user.id, &conversation_id, &title_from(&first_text))
        .await?;

    if let Some(last) = payload.messages.last().filter(|m| m.role == "user") {
        state
            .conversation_service
            .append_message(
                &user.id,
                &conversation_id,
                NewMessage::text(MessageRole::User, last.content_text()),
            )
            .await?;
    }

    let mut prompt = vec![ChatMessage::system(SYSTEM_PROMPT)];
    prompt.extend(
        payload
            .messages
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .map(|m| ChatMessage {
                role: m.role.clone(),
                content: m.content_text(),
            }),
    );

    debug!(
        user_id = %user.id,
        email = %safe_email_log(&user.email),
        conversation_id = %conversation_id,
        history = prompt.len() - 1,
        "Sending chat turn to model"
    );

    let mut deltas = state
        .llm_service
        .stream_chat(&prompt, &state.tool_service.definitions())
        .await?;

    let turn = ChatTurn {
        conversations: state.conversation_service.clone(),
        user_id: user.id,
        conversation_id,
    };

    match read_opening(&mut deltas).await? {
        Opening::Text(opening) => Ok(stream_text(turn, opening, deltas)),
        Opening::ToolCalls(calls) => answer_with_tools(&state, &turn, calls, deltas).await,
        Opening::Empty => {
            warn!(conversation_id = %turn.conversation_id, "Model returned an empty answer");
            Ok(text_response(Body::empty()))
        }
    }
}

/// GET /api/chat/conversations
pub async fn list_conversations(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let state = state_lock.read().await.clone();
    let conversations = state.conversation_service.list_for_user(&user.id).await?;
    Ok(Json(conversations))
}

/// GET /api/chat/conversation/:id
pub async fn get_conversation(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let state = state_lock.read().await.clone();
    let messages = state
        .conversation_service
        .messages_for(&user.id, &conversation_id)
        .await?;

    if messages.is_empty() {
        return Err(ApiError::NotFound("Conversation not found".to_string()));
    }

    Ok(Json(messages))
}

/// DELETE /api/chat/conversation/:id
pub async fn delete_conversation(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
    Path(conversation_id): Path<String>,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();

    if state
        .conversation_service
        .delete(&user.id, &conversation_id)
        .await?
    {
        Ok(Json(json!({ "success": true, "message": "Deleted successfully" })).into_response())
    } else {
        Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": "Conversation not found or unauthorized"
            })),
        )
            .into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn scripted(deltas: Vec<Result<LlmDelta, LlmError>>) -> DeltaStream {
        Box::pin(stream::iter(deltas))
    }

    #[tokio::test]
    async fn test_opening_with_text() {
        let mut deltas = scripted(vec![
            Ok(LlmDelta::Text("\n".to_string())),
            Ok(LlmDelta::Text("Hello".to_string())),
            Ok(LlmDelta::Text(" there".to_string())),
        ]);

        match read_opening(&mut deltas).await.unwrap() {
            Opening::Text(text) => assert_eq!(text, "\nHello"),
            _ => panic!("expected text"),
        }
        // The rest of the answer is left for the streaming task
        assert_eq!(
            deltas.next().await.unwrap().unwrap(),
            LlmDelta::Text(" there".to_string())
        );
    }

    #[tokio::test]
    async fn test_opening_with_tool_call_after_whitespace() {
        let mut deltas = scripted(vec![
            Ok(LlmDelta::Text(" ".to_string())),
            Ok(LlmDelta::ToolCall {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some("getF1Matches".to_string()),
                arguments: "{}".to_string(),
            }),
        ]);

        match read_opening(&mut deltas).await.unwrap() {
            Opening::ToolCalls(calls) => {
                let calls = calls.finish();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "getF1Matches");
            }
            _ => panic!("expected tool calls"),
        }
    }

    #[tokio::test]
    async fn test_opening_empty_and_failed() {
        let mut empty = scripted(vec![Ok(LlmDelta::Finish("stop".to_string()))]);
        assert!(matches!(
            read_opening(&mut empty).await.unwrap(),
            Opening::Empty
        ));

        let mut failed = scripted(vec![Err(LlmError::RateLimitExceeded)]);
        assert!(matches!(
            read_opening(&mut failed).await,
            Err(LlmError::RateLimitExceeded)
        ));
    }
}
