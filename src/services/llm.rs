// src/services/llm.rs
//! Streaming chat completions against an OpenAI-compatible endpoint (OpenRouter)

use eventsource_stream::Eventsource;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tracing::{debug, error, info};

use crate::common::config::LlmConfig;
use crate::common::ApiError;

const DONE_MARKER: &str = "[DONE]";

pub const SYSTEM_PROMPT: &str = "\
You are a real-time assistant.
- If the user asks about weather in any way, detect the city or location they mention, call the 'getWeather' tool and put the detected city/location directly into the 'location' parameter.
- Do not answer about weather yourself; always use the tool.
- If the user asks about stock prices, detect the ticker symbol and call 'getStockPrice' with it in the 'symbol' parameter.
- If the user asks about F1 races, call 'getF1Matches'.

Always extract the necessary value from the user's message automatically.
- For weather, stock prices, or F1, call the appropriate tool immediately.
- DO NOT explain that you are calling a tool.
- DO NOT provide internal reasoning or \"Chain of Thought.\"
- Only output the final tool call or the final natural language response based on the tool's result.";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid stream chunk: {0}")]
    InvalidResponse(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        error!(error = %err, "Language model call failed");
        ApiError::ServiceUnavailable("The assistant is unavailable right now".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }
}

/// A completed tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One increment of the model's streamed answer
#[derive(Debug, Clone, PartialEq)]
pub enum LlmDelta {
    Text(String),
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finish(String),
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<LlmDelta, LlmError>> + Send>>;

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parses the `data:` payload of one streamed chunk
pub fn parse_chunk(data: &str) -> Result<Vec<LlmDelta>, LlmError> {
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    if let Some(err) = chunk.error {
        return Err(LlmError::RequestFailed(
            err.message.unwrap_or_else(|| "provider error".to_string()),
        ));
    }

    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                deltas.push(LlmDelta::Text(text));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                deltas.push(LlmDelta::ToolCall {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                });
            }
        }
        if let Some(reason) = choice.finish_reason {
            deltas.push(LlmDelta::Finish(reason));
        }
    }

    Ok(deltas)
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Reassembles tool calls whose name and arguments arrive in fragments
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn push(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let entry = self.calls.entry(index).or_default();
        if id.is_some() {
            entry.id = id;
        }
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            entry.name = Some(name);
        }
        entry.arguments.push_str(arguments);
    }

    /// Completed calls in index order; fragments that never got a name are dropped
    ///
    /// Providers that omit call ids get a generated one.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter_map(|(_, call)| {
                let name = call.name?;
                Some(ToolCall {
                    id: call
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name,
                    arguments: call.arguments,
                })
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: &'a [serde_json::Value],
    stream: bool,
}

pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(client: Client, config: LlmConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Opens a streamed completion and yields its deltas until `[DONE]`
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<DeltaStream, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            tools,
            stream: true,
        };

        debug!(
            model = %self.config.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Opening chat completion stream"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimitExceeded);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Chat completion request failed");
            return Err(LlmError::RequestFailed(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        info!(model = %self.config.model, "Chat completion stream opened");

        let deltas = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(ev) if ev.data.trim() == DONE_MARKER);
                futures::future::ready(!done)
            })
            .flat_map(|event| {
                let batch: Vec<Result<LlmDelta, LlmError>> = match event {
                    Ok(ev) if ev.data.trim().is_empty() => Vec::new(),
                    Ok(ev) => match parse_chunk(&ev.data) {
                        Ok(deltas) => deltas.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    },
                    Err(e) => vec![Err(LlmError::Stream(e.to_string()))],
                };
                stream::iter(batch)
            });

        Ok(Box::pin(deltas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_chunk() {
        let data = r#"{"id":"gen-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(
            parse_chunk(data).unwrap(),
            vec![LlmDelta::Text("Hello".to_string())]
        );
    }

    #[test]
    fn test_parse_tool_call_chunks() {
        let first = r#"{"choices":[{"delta":{"content":null,"tool_calls":[{"index":0,"id":"call_abc","type":"function","function":{"name":"getWeather","arguments":""}}]}}]}"#;
        let second = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"location\":\"Paris\"}"}}]}}]}"#;
        let last = r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#;

        let mut acc = ToolCallAccumulator::default();
        for data in [first, second, last] {
            for delta in parse_chunk(data).unwrap() {
                if let LlmDelta::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } = delta
                {
                    acc.push(index, id, name, &arguments);
                }
            }
        }

        assert_eq!(
            acc.finish(),
            vec![ToolCall {
                id: "call_abc".to_string(),
                name: "getWeather".to_string(),
                arguments: r#"{"location":"Paris"}"#.to_string(),
            }]
        );
        assert_eq!(
            parse_chunk(last).unwrap(),
            vec![LlmDelta::Finish("tool_calls".to_string())]
        );
    }

    #[test]
    fn test_parse_error_chunk() {
        let data = r#"{"error":{"code":429,"message":"Rate limit exceeded: free-models-per-day"}}"#;
        match parse_chunk(data) {
            Err(LlmError::RequestFailed(msg)) => assert!(msg.contains("free-models-per-day")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            parse_chunk("not json"),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_accumulator_orders_and_drops_unnamed_calls() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(1, None, Some("getF1Matches".to_string()), "{}");
        acc.push(0, Some("c0".to_string()), Some("getStockPrice".to_string()), "{\"symbol\":");
        acc.push(0, None, None, "\"AAPL\"}");
        acc.push(2, None, None, "{}");

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "getStockPrice");
        assert_eq!(calls[0].arguments, r#"{"symbol":"AAPL"}"#);
        assert_eq!(calls[0].id, "c0");
        assert!(calls[1].id.starts_with("call_"));
        assert_ne!(calls[1].id, "call_");
    }
}
