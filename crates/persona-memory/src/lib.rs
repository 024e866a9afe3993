//! `persona-memory` – The Conversation Memory.
//!
//! Gives the bot a recent-turn window per channel and an optional persistent,
//! embedding-indexed recall layer on top of a local SQLite substrate.
//!
//! # Modules
//!
//! - [`short_term`] – [`ShortTermStore`][short_term::ShortTermStore]: a
//!   bounded FIFO window of recent turns per channel, rendered as a
//!   newline-joined prompt context.
//! - [`long_term`] – [`LongTermStore`][long_term::LongTermStore]: the
//!   persistent memory with an explicit `Uninitialized → Ready` lifecycle.
//!   Writes fail loudly, reads degrade to empty results.
//! - [`index`] – the [`DocumentIndex`][index::DocumentIndex] seam and its
//!   SQLite implementation [`SqliteIndex`][index::SqliteIndex], which ranks
//!   documents by cosine similarity of their embeddings.
//! - [`embedder`] – the [`Embedder`][embedder::Embedder] trait with a local
//!   feature-hashing implementation and an Ollama HTTP client.
//! - [`summarizer`] – [`ConversationSummarizer`][summarizer::ConversationSummarizer]:
//!   compacts a stretch of conversation into a short summary on demand.

pub mod embedder;
pub mod index;
pub mod long_term;
pub mod short_term;
pub mod summarizer;

pub use long_term::{LongTermConfig, LongTermStats, LongTermStore, RecalledMemory};
pub use short_term::{ShortTermStats, ShortTermStore};
