//! Long-Term Memory.
//!
//! Durable, semantically searchable memory beyond the short-term window.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──▶ Ready
//! ```
//!
//! A freshly constructed [`LongTermStore`] never touches disk.  Every read or
//! write before [`initialize`](LongTermStore::initialize) fails with
//! [`PersonaError::Uninitialized`]: that is a driver bug and is reported
//! loudly.  Once ready, the index handle is shared by every task for the rest
//! of the process.
//!
//! # Failure policy
//!
//! * **Writes fail loud.**  [`add_memory`](LongTermStore::add_memory) logs and
//!   propagates storage errors; a silently dropped memory would corrupt the
//!   long-term state without anyone noticing.
//! * **Reads fail soft.**  [`retrieve`](LongTermStore::retrieve) and
//!   [`get_recent_memories`](LongTermStore::get_recent_memories) log index
//!   errors and return an empty result so a flaky index never breaks a reply.
//!
//! No operation retries.
//!
//! # Record ids
//!
//! Ids are `mem_<n>` with `n` taken from a counter primed at initialisation
//! with one past the highest persisted `n` (or the record count, whichever is
//! larger), so numbering continues across restarts and never reuses an id,
//! even when an earlier write failed and left a gap.
//! [`clear_all`](LongTermStore::clear_all) empties the collection and restarts
//! the counter at `0`.  It waits for in-flight writes to finish and blocks new
//! ones until the reset is done, so no pre-clear write can land afterwards.
//!
//! # Timestamps
//!
//! `add_memory` always writes `metadata["timestamp"]` with the current time,
//! **overwriting** any value supplied by the caller.  Every memory is dated by
//! when it was stored, not by when the conversation happened.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use persona_types::{MemoryRecord, Metadata, PersonaError, TIMESTAMP_KEY, memory_id};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::embedder::{Embedder, HashingEmbedder};
use crate::index::{DocumentIndex, SqliteIndex};

/// Collection name used unless configured otherwise.  Keeping it stable
/// across restarts is what lets ids continue instead of resetting.
pub const DEFAULT_COLLECTION: &str = "discord_memories";

/// Default directory holding the index database.
pub const DEFAULT_DB_PATH: &str = "data/vector_db";

const COMPONENT: &str = "Long-term memory";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`LongTermStore`].
#[derive(Clone)]
pub struct LongTermConfig {
    /// Directory holding the persistent index.
    pub db_path: PathBuf,
    /// Logical collection name inside the index.
    pub collection: String,
    /// Embedding model used to index and query documents.
    pub embedder: Arc<dyn Embedder>,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            collection: DEFAULT_COLLECTION.to_string(),
            embedder: Arc::new(HashingEmbedder::default()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public record / stats shapes
// ─────────────────────────────────────────────────────────────────────────────

/// A stored memory as returned by [`LongTermStore::get_recent_memories`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledMemory {
    pub content: String,
    pub metadata: Metadata,
}

/// Status report of a [`LongTermStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LongTermStats {
    NotInitialized,
    Active { total_memories: usize, db_path: String },
    Error { error: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// LongTermStore
// ─────────────────────────────────────────────────────────────────────────────

struct Ready {
    index: Arc<dyn DocumentIndex>,
    next_id: AtomicU64,
    /// Shared by writers, exclusive for `clear_all`.
    writes: tokio::sync::RwLock<()>,
}

/// Persistent, retrieval-augmented memory store.
pub struct LongTermStore {
    config: LongTermConfig,
    state: RwLock<Option<Arc<Ready>>>,
}

impl LongTermStore {
    /// Create an uninitialised store.  No I/O happens until
    /// [`initialize`](Self::initialize).
    pub fn new(config: LongTermConfig) -> Self {
        info!(db_path = %config.db_path.display(), collection = %config.collection, "long-term memory created");
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Open or create the SQLite index at the configured path and prime the
    /// id counter past the highest persisted id.
    ///
    /// Calling this on a ready store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PersonaError::Storage`] if the backing store cannot be
    /// opened.  Deciding whether that is fatal is up to the caller.
    pub async fn initialize(&self) -> Result<(), PersonaError> {
        if self.is_initialized() {
            return Ok(());
        }
        let index = SqliteIndex::open(
            &self.config.db_path,
            self.config.collection.clone(),
            Arc::clone(&self.config.embedder),
        )
        .await
        .map_err(|e| {
            error!(error = %e, db_path = %self.config.db_path.display(), "failed to initialize long-term memory");
            PersonaError::Storage(e.to_string())
        })?;
        self.initialize_with(Arc::new(index)).await
    }

    /// Transition to `Ready` using a caller-supplied index.
    pub async fn initialize_with(&self, index: Arc<dyn DocumentIndex>) -> Result<(), PersonaError> {
        let existing = index.count().await.map_err(|e| {
            error!(error = %e, "failed to count persisted memories");
            PersonaError::Storage(e.to_string())
        })?;
        let highest = index.max_sequence().await.map_err(|e| {
            error!(error = %e, "failed to read highest memory id");
            PersonaError::Storage(e.to_string())
        })?;
        let next = highest.map_or(0, |n| n.saturating_add(1)).max(existing as u64);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.is_some() {
            warn!("long-term memory already initialized; keeping existing index");
            return Ok(());
        }
        *state = Some(Arc::new(Ready {
            index,
            next_id: AtomicU64::new(next),
            writes: tokio::sync::RwLock::new(()),
        }));
        info!(existing, next_id = next, "long-term memory ready");
        Ok(())
    }

    /// Persist `content` and return its assigned id.
    ///
    /// `metadata["timestamp"]` is always overwritten with the current time.
    pub async fn add_memory(&self, content: &str, metadata: Option<Metadata>) -> Result<String, PersonaError> {
        let ready = self.ready()?;
        let _write = ready.writes.read().await;
        let id = memory_id(ready.next_id.fetch_add(1, Ordering::SeqCst));

        let timestamp = Utc::now();
        let mut metadata = metadata.unwrap_or_default();
        metadata.insert(TIMESTAMP_KEY.to_string(), timestamp.to_rfc3339());

        let record = MemoryRecord {
            id: id.clone(),
            content: content.to_string(),
            metadata,
            timestamp,
        };
        if let Err(e) = ready.index.add(vec![record]).await {
            error!(error = %e, %id, "failed to add memory");
            return Err(PersonaError::Storage(e.to_string()));
        }
        debug!(%id, "memory added");
        Ok(id)
    }

    /// Return up to `top_k` stored contents most relevant to `query`, most
    /// relevant first, optionally restricted to records whose metadata
    /// contains every pair of `filter_metadata`.
    ///
    /// Index failures are logged and yield an empty list.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter_metadata: Option<&Metadata>,
    ) -> Result<Vec<String>, PersonaError> {
        let ready = self.ready()?;
        match ready.index.query(query, top_k, filter_metadata).await {
            Ok(memories) => {
                let preview: String = query.chars().take(50).collect();
                debug!(count = memories.len(), query = %preview, "memories retrieved");
                Ok(memories)
            }
            Err(e) => {
                error!(error = %e, "failed to retrieve memories");
                Ok(Vec::new())
            }
        }
    }

    /// Return up to `count` stored memories.
    ///
    /// The order is whatever the index yields; the bundled SQLite index
    /// happens to return insertion order, but callers must not rely on
    /// recency.  Index failures are logged and yield an empty list.
    pub async fn get_recent_memories(&self, count: usize) -> Result<Vec<RecalledMemory>, PersonaError> {
        let ready = self.ready()?;
        match ready.index.get(count).await {
            Ok(records) => {
                debug!(count = records.len(), "recent memories fetched");
                Ok(records
                    .into_iter()
                    .map(|r| RecalledMemory {
                        content: r.content,
                        metadata: r.metadata,
                    })
                    .collect())
            }
            Err(e) => {
                error!(error = %e, "failed to get recent memories");
                Ok(Vec::new())
            }
        }
    }

    /// Irreversibly delete every memory and restart ids at `mem_0`.
    ///
    /// Does nothing on an uninitialised store.
    pub async fn clear_all(&self) -> Result<(), PersonaError> {
        let Some(ready) = self.current() else {
            return Ok(());
        };
        let _exclusive = ready.writes.write().await;
        ready.index.reset().await.map_err(|e| {
            error!(error = %e, "failed to clear memories");
            PersonaError::Storage(e.to_string())
        })?;
        ready.next_id.store(0, Ordering::SeqCst);
        warn!("all long-term memories cleared");
        Ok(())
    }

    pub async fn get_stats(&self) -> LongTermStats {
        let Some(ready) = self.current() else {
            return LongTermStats::NotInitialized;
        };
        match ready.index.count().await {
            Ok(total_memories) => LongTermStats::Active {
                total_memories,
                db_path: ready.index.location(),
            },
            Err(e) => {
                error!(error = %e, "failed to get long-term stats");
                LongTermStats::Error { error: e.to_string() }
            }
        }
    }

    fn current(&self) -> Option<Arc<Ready>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn ready(&self) -> Result<Arc<Ready>, PersonaError> {
        self.current().ok_or(PersonaError::Uninitialized(COMPONENT))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
