use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of one conversation (a Discord channel id).
pub type ChannelId = u64;

/// Flat string-to-string metadata attached to a long-term memory.
///
/// A `BTreeMap` keeps serialisation order stable so identical metadata
/// always produces identical JSON.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key stamped by the long-term store on every write.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// One recorded utterance in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    author: String,
    content: String,
    timestamp: DateTime<Utc>,
}

impl Turn {
    /// Record a turn stamped with the current UTC time.
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::at(author, content, Utc::now())
    }

    /// Record a turn with an explicit timestamp.
    pub fn at(author: impl Into<String>, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            timestamp,
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Prompt rendering of this turn: `"{author}: {content}"`.
    pub fn render(&self) -> String {
        format!("{}: {}", self.author, self.content)
    }
}

/// A persisted long-term memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Sequence token of the form `mem_<n>`.
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

/// Prefix of every long-term memory id.
pub const MEMORY_ID_PREFIX: &str = "mem_";

/// Format the sequence id for the `n`-th memory.
pub fn memory_id(n: u64) -> String {
    format!("{MEMORY_ID_PREFIX}{n}")
}

/// Global error type spanning storage faults, embedding and generation
/// failures, and misuse of an uninitialised subsystem.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum PersonaError {
    #[error("{0} not initialized; call initialize() first")]
    Uninitialized(&'static str),

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Embedding Error: {0}")]
    Embedding(String),

    #[error("Generation Error: {0}")]
    Generation(String),

    #[error("Config Error: {0}")]
    Config(String),
}
