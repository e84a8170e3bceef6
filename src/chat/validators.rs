use super::models::ChatRequest;
use crate::common::{ApiError, ValidationResult, Validator};

const MAX_CONVERSATION_ID_LENGTH: usize = 128;
const ALLOWED_ROLES: [&str; 4] = ["system", "user", "assistant", "tool"];

pub const MISSING_FIELDS_MESSAGE: &str = "Missing required fields";

pub struct ChatRequestValidator;

impl Validator<ChatRequest> for ChatRequestValidator {
    fn validate(&self, data: &ChatRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data
            .messages
            .iter()
            .any(|m| !ALLOWED_ROLES.contains(&m.role.as_str()))
        {
            result.add_error("messages", "Each message needs a valid role");
        }

        if let Some(id) = &data.conversation_id {
            if id.len() > MAX_CONVERSATION_ID_LENGTH {
                result.add_error("conversationId", "Conversation id is too long");
            }
        }

        result
    }
}

/// Validates a chat request, returning the conversation id to use
pub fn validate_chat_request(request: &ChatRequest) -> Result<String, ApiError> {
    let conversation_id = request
        .conversation_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let conversation_id = match conversation_id {
        Some(id) if !request.messages.is_empty() => id.to_string(),
        _ => return Err(ApiError::BadRequest(MISSING_FIELDS_MESSAGE.to_string())),
    };

    ChatRequestValidator.validate(request).into_result()?;

    Ok(conversation_id)
}
