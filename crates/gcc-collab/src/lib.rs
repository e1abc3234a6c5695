//! Wire contracts for the external collaborators the orchestrator depends
//! on (spec §6): an LLM, a vector store, and a SQL-shaped index.
//!
//! Grounded on `csa-executor::transport::Transport` for the shape of a
//! pluggable external contract (`#[async_trait] trait X: Send + Sync`).

use async_trait::async_trait;
use gcc_core::{AppError, Message, ToolCall};
use serde_json::{Map, Value};

mod ollama;
mod vector;

pub use ollama::OllamaCollaborator;
pub use vector::SqliteVectorStore;

/// A tool the LLM collaborator may call, advertised to `generate`.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One item of the `generate` event stream (spec §6, §9 "event stream").
#[derive(Debug, Clone)]
pub enum GenerateEvent {
    TextDelta(String),
    ToolCall(ToolCall),
}

/// `generate(messages, tools?, stream?) -> stream of {text_delta|tool_call}`;
/// `embed(text) -> vector<float32>` (spec §6 wire dependencies).
#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        stream: bool,
    ) -> Result<Vec<GenerateEvent>, AppError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

/// `add(texts, metadatas)`, `search(query_vec, limit, threshold) ->
/// [(text, metadata, score)]`, `delete(filter)` (spec §6).
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, texts: Vec<String>, metadatas: Vec<Map<String, Value>>) -> Result<(), AppError>;

    async fn search(
        &self,
        query_vec: Vec<f32>,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(String, Map<String, Value>, f32)>, AppError>;

    async fn delete(&self, filter: Map<String, Value>) -> Result<(), AppError>;
}

/// Parameterized execute, read-execute, schema introspection (spec §6).
#[async_trait]
pub trait SqlIndex: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, AppError>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Map<String, Value>>, AppError>;

    fn schema(&self) -> Vec<String>;
}
