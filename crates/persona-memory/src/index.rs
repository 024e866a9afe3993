//! Embedding-indexed document store.
//!
//! [`DocumentIndex`] is the seam between the long-term store and whatever
//! persists and ranks its records.  [`SqliteIndex`] is the bundled
//! implementation: documents and their embedding vectors live in a local
//! SQLite database and queries are ranked by cosine similarity.
//!
//! # Storage layout
//!
//! ```text
//! <dir>/memories.sqlite3
//! ```
//!
//! Two tables are created (if they do not already exist):
//!
//! | table         | column      | type    | description                               |
//! |---------------|-------------|---------|-------------------------------------------|
//! | `collections` | name        | TEXT    | Collection name (primary key)             |
//! |               | description | TEXT    | Free-form description                     |
//! |               | created_at  | TEXT    | RFC-3339 creation time (UTC)              |
//! | `documents`   | seq         | INTEGER | Insertion sequence (autoincrement)        |
//! |               | collection  | TEXT    | Owning collection                         |
//! |               | id          | TEXT    | Record id, unique per collection          |
//! |               | content     | TEXT    | Document text                             |
//! |               | metadata    | TEXT    | JSON object of string → string            |
//! |               | timestamp   | TEXT    | RFC-3339 write time (UTC)                 |
//! |               | embedding   | BLOB    | Little-endian f32 vector (4 × N bytes)    |
//!
//! All SQLite work runs on Tokio's blocking pool so callers never stall the
//! scheduler.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use persona_types::{MEMORY_ID_PREFIX, MemoryRecord, Metadata};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::debug;

use crate::embedder::{EmbedError, Embedder, cosine_similarity};

/// File name of the SQLite database inside the index directory.
pub const DATABASE_FILE: &str = "memories.sqlite3";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from document index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),
    #[error("Metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Embedding vectors must be non-empty")]
    EmptyEmbedding,
    #[error("Blocking task failed: {0}")]
    Task(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A persistent, embedding-indexed document collection.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Insert `records`.  Duplicate ids are rejected.
    async fn add(&self, records: Vec<MemoryRecord>) -> Result<(), IndexError>;

    /// Return up to `top_k` document texts ranked by relevance to `text`,
    /// most relevant first.  Documents whose content equals `text` rank
    /// ahead of everything else.  When `filter` is given only documents whose
    /// metadata contains every `(key, value)` pair are considered.
    async fn query(&self, text: &str, top_k: usize, filter: Option<&Metadata>) -> Result<Vec<String>, IndexError>;

    /// Return up to `limit` stored records in index-defined order.
    async fn get(&self, limit: usize) -> Result<Vec<MemoryRecord>, IndexError>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize, IndexError>;

    /// Highest `n` among stored `mem_<n>` ids, or `None` when there are none.
    async fn max_sequence(&self) -> Result<Option<u64>, IndexError>;

    /// Delete every record in the collection.
    async fn reset(&self) -> Result<(), IndexError>;

    /// Human-readable storage location, for stats.
    fn location(&self) -> String;
}

/// `true` when every `(key, value)` pair of `filter` is present in `metadata`.
pub fn metadata_matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteIndex
// ─────────────────────────────────────────────────────────────────────────────

struct Row {
    record: MemoryRecord,
    embedding: Vec<f32>,
}

struct Ranked {
    content: String,
    exact: bool,
    score: f32,
}

/// SQLite-backed [`DocumentIndex`].
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    embedder: Arc<dyn Embedder>,
    location: String,
}

impl SqliteIndex {
    /// Open (or create) the index database inside `dir` and get-or-create
    /// `collection`.  The directory is created if missing.
    pub async fn open(
        dir: impl AsRef<Path>,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        let dir: PathBuf = dir.as_ref().to_path_buf();
        let collection = collection.into();
        let location = dir.display().to_string();
        let name = collection.clone();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, IndexError> {
            std::fs::create_dir_all(&dir)?;
            let conn = Connection::open(dir.join(DATABASE_FILE))?;
            init_schema(&conn, &name)?;
            Ok(conn)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))??;

        debug!(%location, %collection, model = embedder.model_name(), "document index opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            collection,
            embedder,
            location,
        })
    }

    /// Open a temporary in-memory index (useful for testing).
    pub fn open_in_memory(collection: impl Into<String>, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let collection = collection.into();
        let conn = Connection::open_in_memory()?;
        init_schema(&conn, &collection)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            collection,
            embedder,
            location: ":memory:".to_string(),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, IndexError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T, IndexError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let collection = self.collection.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn, &collection)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?
    }
}

fn init_schema(conn: &Connection, collection: &str) -> Result<(), IndexError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS collections (
            name        TEXT NOT NULL PRIMARY KEY,
            description TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS documents (
            seq        INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            id         TEXT NOT NULL,
            content    TEXT NOT NULL,
            metadata   TEXT NOT NULL,
            timestamp  TEXT NOT NULL,
            embedding  BLOB NOT NULL,
            UNIQUE (collection, id)
        );",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO collections (name, description, created_at) VALUES (?1, ?2, ?3)",
        params![collection, "Discord conversation memories", Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn load_rows(conn: &Connection, collection: &str, limit: Option<usize>) -> Result<Vec<Row>, IndexError> {
    // SQLite treats a negative LIMIT as "no limit".
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let mut stmt = conn.prepare(
        "SELECT id, content, metadata, timestamp, embedding
         FROM documents
         WHERE collection = ?1
         ORDER BY seq ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![collection, limit], |row| {
        let id: String = row.get(0)?;
        let content: String = row.get(1)?;
        let metadata: String = row.get(2)?;
        let ts: String = row.get(3)?;
        let blob: Vec<u8> = row.get(4)?;
        Ok((id, content, metadata, ts, blob))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, content, metadata, ts, blob) = row?;
        let timestamp = ts.parse::<DateTime<Utc>>().map_err(|e| {
            rusqlite::Error::InvalidColumnType(3, e.to_string(), rusqlite::types::Type::Text)
        })?;
        out.push(Row {
            record: MemoryRecord {
                id,
                content,
                metadata: serde_json::from_str(&metadata)?,
                timestamp,
            },
            embedding: bytes_to_embedding(&blob),
        });
    }
    Ok(out)
}

#[async_trait]
impl DocumentIndex for SqliteIndex {
    async fn add(&self, records: Vec<MemoryRecord>) -> Result<(), IndexError> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let embedding = self.embedder.embed(&record.content).await?;
            if embedding.is_empty() {
                return Err(IndexError::EmptyEmbedding);
            }
            rows.push(Row { record, embedding });
        }

        self.with_conn(move |conn, collection| {
            let tx = conn.unchecked_transaction()?;
            for row in &rows {
                tx.execute(
                    "INSERT INTO documents (collection, id, content, metadata, timestamp, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        collection,
                        row.record.id,
                        row.record.content,
                        serde_json::to_string(&row.record.metadata)?,
                        row.record.timestamp.to_rfc3339(),
                        embedding_to_bytes(&row.embedding),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn query(&self, text: &str, top_k: usize, filter: Option<&Metadata>) -> Result<Vec<String>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(text).await?;
        if query_embedding.is_empty() {
            return Err(IndexError::EmptyEmbedding);
        }
        let filter = filter.cloned();
        let text = text.to_string();

        self.with_conn(move |conn, collection| {
            let mut ranked: Vec<Ranked> = load_rows(conn, collection, None)?
                .into_iter()
                .filter(|row| filter.as_ref().is_none_or(|f| metadata_matches(&row.record.metadata, f)))
                .filter_map(|row| {
                    let exact = row.record.content == text;
                    (exact || row.embedding.len() == query_embedding.len()).then(|| Ranked {
                        score: cosine_similarity(&row.embedding, &query_embedding),
                        content: row.record.content,
                        exact,
                    })
                })
                .collect();
            // Stable sort: equal ranks keep insertion order.
            ranked.sort_by(|a, b| b.exact.cmp(&a.exact).then(b.score.total_cmp(&a.score)));
            ranked.truncate(top_k);
            Ok(ranked.into_iter().map(|r| r.content).collect())
        })
        .await
    }

    async fn get(&self, limit: usize) -> Result<Vec<MemoryRecord>, IndexError> {
        self.with_conn(move |conn, collection| {
            Ok(load_rows(conn, collection, Some(limit))?
                .into_iter()
                .map(|row| row.record)
                .collect())
        })
        .await
    }

    async fn count(&self) -> Result<usize, IndexError> {
        self.with_conn(|conn, collection| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
    }

    async fn max_sequence(&self) -> Result<Option<u64>, IndexError> {
        self.with_conn(|conn, collection| {
            let n: Option<i64> = conn.query_row(
                "SELECT MAX(CAST(substr(id, ?2) AS INTEGER))
                 FROM documents
                 WHERE collection = ?1 AND id GLOB ?3",
                params![
                    collection,
                    MEMORY_ID_PREFIX.len() as i64 + 1,
                    format!("{MEMORY_ID_PREFIX}[0-9]*"),
                ],
                |row| row.get(0),
            )?;
            Ok(n.and_then(|n| u64::try_from(n).ok()))
        })
        .await
    }

    async fn reset(&self) -> Result<(), IndexError> {
        self.with_conn(|conn, collection| {
            conn.execute("DELETE FROM documents WHERE collection = ?1", params![collection])?;
            Ok(())
        })
        .await
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;

    fn record(id: &str, content: &str, pairs: &[(&str, &str)]) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            content: content.to_string(),
            metadata: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            timestamp: Utc::now(),
        }
    }

    fn index() -> SqliteIndex {
        SqliteIndex::open_in_memory("test", Arc::new(HashingEmbedder::default())).unwrap()
    }

    #[test]
    fn embedding_bytes_roundtrip() {
        let original = vec![1.5f32, -0.25, 0.0, 42.0];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&original)), original);
    }

    #[test]
    fn metadata_filter_requires_every_pair() {
        let meta: Metadata = [("channel", "general"), ("guild", "home")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut filter = Metadata::new();
        assert!(metadata_matches(&meta, &filter));
        filter.insert("channel".into(), "general".into());
        assert!(metadata_matches(&meta, &filter));
        filter.insert("guild".into(), "elsewhere".into());
        assert!(!metadata_matches(&meta, &filter));
    }

    #[tokio::test]
    async fn add_count_and_get() {
        let idx = index();
        idx.add(vec![record("mem_0", "first", &[]), record("mem_1", "second", &[])])
            .await
            .unwrap();
        assert_eq!(idx.count().await.unwrap(), 2);

        let all = idx.get(10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "mem_0");
        assert_eq!(idx.get(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_ranks_exact_text_first() {
        let idx = index();
        idx.add(vec![
            record("mem_0", "we ate ramen last friday", &[]),
            record("mem_1", "the sky is blue", &[]),
            record("mem_2", "blue cheese is gross", &[]),
        ])
        .await
        .unwrap();

        let hits = idx.query("the sky is blue", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], "the sky is blue");
    }

    #[tokio::test]
    async fn query_honours_metadata_filter() {
        let idx = index();
        idx.add(vec![
            record("mem_0", "pizza night", &[("channel", "food")]),
            record("mem_1", "pizza night", &[("channel", "general")]),
        ])
        .await
        .unwrap();

        let mut filter = Metadata::new();
        filter.insert("channel".into(), "general".into());
        let hits = idx.query("pizza", 5, Some(&filter)).await.unwrap();
        assert_eq!(hits, vec!["pizza night".to_string()]);

        filter.insert("channel".into(), "nowhere".into());
        assert!(idx.query("pizza", 5, Some(&filter)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exact_text_wins_over_word_order_variant() {
        let idx = index();
        idx.add(vec![record("mem_0", "blue sky", &[]), record("mem_1", "sky blue", &[])])
            .await
            .unwrap();

        assert_eq!(idx.query("sky blue", 1, None).await.unwrap(), vec!["sky blue".to_string()]);
        assert_eq!(idx.query("blue sky", 1, None).await.unwrap(), vec!["blue sky".to_string()]);
    }

    #[tokio::test]
    async fn exact_text_wins_for_content_without_tokens() {
        let idx = index();
        idx.add(vec![record("mem_0", "blue sky", &[]), record("mem_1", "😂😂", &[])])
            .await
            .unwrap();

        assert_eq!(idx.query("😂😂", 1, None).await.unwrap(), vec!["😂😂".to_string()]);
    }

    #[tokio::test]
    async fn max_sequence_tracks_highest_memory_id() {
        let idx = index();
        assert_eq!(idx.max_sequence().await.unwrap(), None);

        idx.add(vec![
            record("mem_2", "a", &[]),
            record("mem_10", "b", &[]),
            record("not-a-memory", "c", &[]),
        ])
        .await
        .unwrap();
        assert_eq!(idx.max_sequence().await.unwrap(), Some(10));

        idx.reset().await.unwrap();
        assert_eq!(idx.max_sequence().await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let idx = index();
        idx.add(vec![record("mem_0", "a", &[])]).await.unwrap();
        let err = idx.add(vec![record("mem_0", "b", &[])]).await.unwrap_err();
        assert!(matches!(err, IndexError::Sqlite(_)));
        assert_eq!(idx.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_empties_collection() {
        let idx = index();
        idx.add(vec![record("mem_0", "a", &[])]).await.unwrap();
        idx.reset().await.unwrap();
        assert_eq!(idx.count().await.unwrap(), 0);
        assert!(idx.query("a", 3, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_persist_across_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        {
            let idx = SqliteIndex::open(dir.path(), "discord_memories", Arc::clone(&embedder))
                .await
                .unwrap();
            idx.add(vec![record("mem_0", "persisted", &[("k", "v")])]).await.unwrap();
        }
        let idx = SqliteIndex::open(dir.path(), "discord_memories", embedder).await.unwrap();
        let all = idx.get(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "persisted");
        assert_eq!(all[0].metadata.get("k").map(String::as_str), Some("v"));
        assert!(dir.path().join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn collections_are_isolated_in_one_database() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        let a = SqliteIndex::open(dir.path(), "a", Arc::clone(&embedder)).await.unwrap();
        let b = SqliteIndex::open(dir.path(), "b", embedder).await.unwrap();
        a.add(vec![record("mem_0", "only in a", &[])]).await.unwrap();
        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 0);
    }
}
