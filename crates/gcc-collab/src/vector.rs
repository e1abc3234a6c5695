//! SQLite-backed `VectorStore`, brute-force cosine similarity (spec §6).
//!
//! No teacher crate has a vector store; grounded on the corpus-wide
//! `rusqlite` convention (`gcc-index` already uses it for the session
//! index) rather than pulling in a dedicated vector-database crate the
//! pack never demonstrates.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gcc_core::AppError;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::{LlmCollaborator, VectorStore};

fn map_err(err: rusqlite::Error) -> AppError {
    AppError::Fatal(err.to_string())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn encode_vec(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A [`VectorStore`] over a local SQLite file: embeddings are computed
/// on `add` via the held [`LlmCollaborator`] and compared with brute-force
/// cosine similarity on `search`. Fine for the single-process, modest-scale
/// corpus this component indexes (command history + semantic cache
/// entries), not a general-purpose ANN index.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn LlmCollaborator>,
}

impl SqliteVectorStore {
    pub fn open(path: &std::path::Path, embedder: Arc<dyn LlmCollaborator>) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Fatal(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(map_err)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
            [],
        )
        .map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    #[cfg(test)]
    fn open_in_memory(embedder: Arc<dyn LlmCollaborator>) -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
            [],
        )
        .map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, texts: Vec<String>, metadatas: Vec<Map<String, Value>>) -> Result<(), AppError> {
        for (text, metadata) in texts.into_iter().zip(metadatas) {
            let embedding = self.embedder.embed(&text).await?;
            let id = ulid::Ulid::new().to_string();
            let metadata_json = serde_json::to_string(&metadata).map_err(|e| AppError::Fatal(e.to_string()))?;
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO vectors (id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, text, metadata_json, encode_vec(&embedding)],
            )
            .map_err(map_err)?;
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vec: Vec<f32>,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<(String, Map<String, Value>, f32)>, AppError> {
        let rows: Vec<(String, String, Vec<u8>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT text, metadata, embedding FROM vectors")
                .map_err(map_err)?;
            stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?))
            })
            .map_err(map_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err)?
        };

        let mut scored: Vec<(String, Map<String, Value>, f32)> = rows
            .into_iter()
            .filter_map(|(text, metadata_json, embedding_bytes)| {
                let metadata: Map<String, Value> = serde_json::from_str(&metadata_json).ok()?;
                let score = cosine_similarity(&query_vec, &decode_vec(&embedding_bytes));
                (score >= threshold).then_some((text, metadata, score))
            })
            .collect();

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, filter: Map<String, Value>) -> Result<(), AppError> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT id, metadata FROM vectors").map_err(map_err)?;
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(map_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_err)?
        };

        let conn = self.conn.lock().unwrap();
        for (id, metadata_json) in rows {
            let metadata: Map<String, Value> = match serde_json::from_str(&metadata_json) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let matches = filter.iter().all(|(k, v)| metadata.get(k) == Some(v));
            if matches {
                conn.execute("DELETE FROM vectors WHERE id = ?1", rusqlite::params![id])
                    .map_err(map_err)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenerateEvent, ToolSpec};
    use gcc_core::Message;

    struct StaticEmbedder(Vec<f32>);

    #[async_trait]
    impl LlmCollaborator for StaticEmbedder {
        async fn generate(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolSpec]>,
            _stream: bool,
        ) -> Result<Vec<GenerateEvent>, AppError> {
            Ok(vec![])
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn vec_encoding_round_trips() {
        let v = vec![0.5_f32, -1.25, 3.0];
        assert_eq!(decode_vec(&encode_vec(&v)), v);
    }

    #[tokio::test]
    async fn add_then_search_finds_matching_entry_above_threshold() {
        let embedder: Arc<dyn LlmCollaborator> = Arc::new(StaticEmbedder(vec![1.0, 0.0, 0.0]));
        let store = SqliteVectorStore::open_in_memory(embedder).unwrap();

        let mut metadata = Map::new();
        metadata.insert("context_type".into(), Value::String("semantic_cache".into()));
        store.add(vec!["restart the pod".into()], vec![metadata]).await.unwrap();

        let hits = store.search(vec![1.0, 0.0, 0.0], 5, 0.9).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "restart the pod");
    }

    #[tokio::test]
    async fn search_excludes_entries_below_threshold() {
        let embedder: Arc<dyn LlmCollaborator> = Arc::new(StaticEmbedder(vec![1.0, 0.0, 0.0]));
        let store = SqliteVectorStore::open_in_memory(embedder).unwrap();
        store.add(vec!["unrelated".into()], vec![Map::new()]).await.unwrap();

        let hits = store.search(vec![0.0, 1.0, 0.0], 5, 0.5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_entries_matching_filter() {
        let embedder: Arc<dyn LlmCollaborator> = Arc::new(StaticEmbedder(vec![1.0, 0.0]));
        let store = SqliteVectorStore::open_in_memory(embedder).unwrap();

        let mut metadata = Map::new();
        metadata.insert("session_id".into(), Value::String("s1".into()));
        store.add(vec!["entry".into()], vec![metadata.clone()]).await.unwrap();

        store.delete(metadata).await.unwrap();

        let hits = store.search(vec![1.0, 0.0], 5, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }
}
