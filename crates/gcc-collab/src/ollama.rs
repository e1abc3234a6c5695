//! Ollama-backed `LlmCollaborator` (spec §6 wire dependency).
//!
//! Request/response shapes grounded on `querymt`'s Ollama provider
//! (`OllamaChatRequest`/`OllamaChatResponseMessage`/`OllamaEmbeddingRequest`);
//! non-streaming only, since the orchestrator never passes `stream: true`.

use std::time::Duration;

use async_trait::async_trait;
use gcc_core::{AppError, Message, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::{GenerateEvent, LlmCollaborator, ToolSpec};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDef<'a>>>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ToolDef<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    function: ToolFunctionDef<'a>,
}

#[derive(Serialize)]
struct ToolFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Deserialize)]
struct OllamaFunctionCall {
    name: String,
    arguments: Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

fn role_for(message: &Message) -> &'static str {
    match message {
        Message::Human { .. } => "user",
        Message::Ai { .. } => "assistant",
        Message::Tool { .. } => "tool",
        Message::System { .. } => "system",
        Message::RemoveMarker { .. } => "system",
    }
}

/// Talks to a single Ollama host/model pair over its HTTP chat/embeddings
/// API (spec §6). One instance backs the planner; a second, separately
/// configured instance backs the optional fast-path reflex model.
pub struct OllamaCollaborator {
    client: reqwest::Client,
    host: String,
    model: String,
    temperature: f32,
    context_size: u32,
}

impl OllamaCollaborator {
    pub fn new(host: impl Into<String>, model: impl Into<String>, temperature: f32, context_size: u32, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            host: host.into(),
            model: model.into(),
            temperature,
            context_size,
        }
    }
}

#[async_trait]
impl LlmCollaborator for OllamaCollaborator {
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        stream: bool,
    ) -> Result<Vec<GenerateEvent>, AppError> {
        debug_assert!(!stream, "the orchestrator never requests a streaming reply");

        let chat_messages: Vec<ChatMessage> = messages
            .iter()
            .filter_map(|m| m.text_content().map(|content| ChatMessage { role: role_for(m), content }))
            .collect();

        let tool_defs = tools.map(|specs| {
            specs
                .iter()
                .map(|spec| ToolDef {
                    kind: "function",
                    function: ToolFunctionDef {
                        name: &spec.name,
                        description: &spec.description,
                        parameters: &spec.parameters,
                    },
                })
                .collect::<Vec<_>>()
        });

        let request = ChatRequest {
            model: &self.model,
            messages: chat_messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_ctx: self.context_size,
            },
            tools: tool_defs,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::LlmError(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::LlmError(e.to_string()))?
            .json::<ChatResponse>()
            .await
            .map_err(|e| AppError::LlmError(e.to_string()))?;

        let mut events = Vec::new();
        if !response.message.content.is_empty() {
            events.push(GenerateEvent::TextDelta(response.message.content));
        }
        for call in response.message.tool_calls {
            events.push(GenerateEvent::ToolCall(ToolCall::new(call.function.name, call.function.arguments)));
        }
        Ok(events)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };
        let response = self
            .client
            .post(format!("{}/api/embed", self.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::LlmError(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::LlmError(e.to_string()))?
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| AppError::LlmError(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LlmError("ollama returned no embedding vector".to_string()))
    }
}
