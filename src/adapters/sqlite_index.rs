//! Semantic index stored in SQLite.
//!
//! Chunks are embedded through an [`Embedder`] and kept with their vectors
//! in one table, partitioned by collection name. Search is brute-force
//! cosine similarity over a collection, which is plenty for a single
//! podcast's back catalogue.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Embedder, SemanticIndex};
use crate::stages::{ChunkMetadata, IndexDocument};

/// A search result, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl SqliteIndex {
    pub fn open(path: &Path, collection: impl Into<String>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open index {}", path.display()))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        ",
        )?;

        Self::with_connection(conn, collection, embedder)
    }

    /// Index backed by a private in-memory database
    pub fn in_memory(collection: impl Into<String>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, collection, embedder)
    }

    fn with_connection(
        conn: Connection,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
            collection: collection.into(),
            embedder,
        };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                date TEXT NOT NULL,
                start_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_collection_guid
                ON chunks(collection, guid);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("index connection lock poisoned"))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of chunks in this collection
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Rank stored chunks by cosine similarity to `query`
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .context("Embedder returned no vector for the query")?;

        let mut hits = self
            .blocking(move |conn, collection| score_all(conn, collection, &query_vector))
            .await?;
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Run `op` against the connection on the blocking thread pool
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let collection = self.collection.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| anyhow!("index connection lock poisoned"))?;
            op(&mut conn, &collection)
        })
        .await
        .context("Index task failed")?
    }
}

fn score_all(conn: &Connection, collection: &str, query: &[f32]) -> Result<Vec<SearchHit>> {
    let mut stmt = conn.prepare(
        "SELECT guid, title, date, start_index, text, embedding
         FROM chunks WHERE collection = ?1",
    )?;

    let rows = stmt.query_map(params![collection], |row| {
        let blob: Vec<u8> = row.get(5)?;
        Ok(SearchHit {
            score: cosine_similarity(query, &decode_vector(&blob)),
            text: row.get(4)?,
            metadata: ChunkMetadata {
                guid: row.get(0)?,
                title: row.get(1)?,
                date: row.get(2)?,
                start_index: row.get::<_, i64>(3)? as usize,
            },
        })
    })?;

    let hits = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// Replace every chunk of the affected episodes with `documents`
fn insert(
    conn: &mut Connection,
    collection: &str,
    documents: &[IndexDocument],
    vectors: &[Vec<f32>],
) -> Result<usize> {
    let tx = conn.transaction()?;

    let mut guids: Vec<&str> = documents.iter().map(|d| d.metadata.guid.as_str()).collect();
    guids.sort_unstable();
    guids.dedup();
    for guid in guids {
        tx.execute(
            "DELETE FROM chunks WHERE collection = ?1 AND guid = ?2",
            params![collection, guid],
        )?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO chunks (collection, guid, title, date, start_index, text, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (doc, vector) in documents.iter().zip(vectors) {
            stmt.execute(params![
                collection,
                doc.metadata.guid,
                doc.metadata.title,
                doc.metadata.date,
                doc.metadata.start_index as i64,
                doc.text,
                encode_vector(vector),
            ])?;
        }
    }

    tx.commit()?;
    Ok(documents.len())
}

#[async_trait]
impl SemanticIndex for SqliteIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn add(&self, documents: &[IndexDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != documents.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                documents.len()
            );
        }

        let documents = documents.to_vec();
        let stored = self
            .blocking(move |conn, collection| insert(conn, collection, &documents, &vectors))
            .await?;
        info!(collection = %self.collection, chunks = stored, "Indexed chunks");
        Ok(stored)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
