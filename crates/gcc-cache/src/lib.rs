//! Semantic Cache (spec §4.J): a query-similarity short-circuit in front
//! of the Planner. Grounded on
//! `original_source/src/intelligence/cache.py::SemanticCache`.

use std::sync::Arc;

use gcc_collab::{LlmCollaborator, VectorStore};
use gcc_core::{AppError, TaskTracker};
use serde_json::{Map, Value};

/// Cosine-similarity threshold above which a cached response is reused
/// (spec §4.J, grounded on the original's `threshold: float = 0.95`).
pub const DEFAULT_THRESHOLD: f32 = 0.95;

const GLOBAL_CACHE_SESSION: &str = "global_cache";
const CONTEXT_TYPE: &str = "semantic_cache";

/// Query-similarity cache over a [`VectorStore`], backed by an
/// [`LlmCollaborator`] for embedding.
pub struct SemanticCache<L, V> {
    llm: Arc<L>,
    vector: Arc<V>,
    threshold: f32,
    tasks: TaskTracker,
}

impl<L, V> SemanticCache<L, V>
where
    L: LlmCollaborator + 'static,
    V: VectorStore + 'static,
{
    pub fn new(llm: Arc<L>, vector: Arc<V>) -> Self {
        Self::with_threshold(llm, vector, DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(llm: Arc<L>, vector: Arc<V>, threshold: f32) -> Self {
        Self {
            llm,
            vector,
            threshold,
            tasks: TaskTracker::new(),
        }
    }

    /// Check whether a similar query has a cached response.
    pub async fn get(&self, query: &str) -> Result<Option<String>, AppError> {
        if query.is_empty() {
            return Ok(None);
        }

        let query_vec = self.llm.embed(query).await?;
        let hits = self.vector.search(query_vec, 1, self.threshold).await?;

        let Some((_, metadata, score)) = hits.into_iter().next() else {
            return Ok(None);
        };

        if metadata.get("context_type").and_then(Value::as_str) != Some(CONTEXT_TYPE) {
            return Ok(None);
        }

        let response = metadata
            .get("cached_response")
            .and_then(Value::as_str)
            .map(str::to_string);

        if response.is_some() {
            tracing::info!(query = %truncate(query, 30), score, "semantic cache hit");
        }

        Ok(response)
    }

    /// Store a query/response pair, fire-and-forget (spec §4.J, §9
    /// "background fire-and-forget" via the shared task tracker).
    pub fn set(&mut self, query: String, response: String) {
        if query.is_empty() || response.is_empty() {
            return;
        }

        let mut metadata = Map::new();
        metadata.insert("context_type".into(), Value::String(CONTEXT_TYPE.into()));
        metadata.insert("query".into(), Value::String(query.clone()));
        metadata.insert("session_id".into(), Value::String(GLOBAL_CACHE_SESSION.into()));
        metadata.insert("cached_response".into(), Value::String(response));

        let vector = Arc::clone(&self.vector);
        tracing::debug!(query = %truncate(&query, 30), "semantic cache set");
        self.tasks.track(async move {
            if let Err(err) = vector.add(vec![query], vec![metadata]).await {
                tracing::warn!(%err, "semantic cache write failed");
            }
        });
    }

    pub async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
