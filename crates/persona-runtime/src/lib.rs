//! `persona-runtime` – The Chat Turn Engine.
//!
//! Where an incoming message turns into a reply.
//!
//! # Modules
//!
//! - [`chat_driver`] – [`ChatDriver`][chat_driver::ChatDriver]: the per-message
//!   orchestrator that reads both memory layers, composes the prompt, calls the
//!   model off the scheduler and records the exchange.  Generation may
//!   overlap, but turns on one channel reach its history in arrival order;
//!   channels run concurrently.
//! - [`generator`] – [`TextGenerator`][generator::TextGenerator] and
//!   [`OllamaGenerator`][generator::OllamaGenerator]: an async HTTP client for
//!   the persona model served by [Ollama](https://ollama.com)
//!   (`http://localhost:11434`).
//! - [`prompt`] – [`build_prompt`][prompt::build_prompt]: folds the persona
//!   line, recalled memories and recent conversation into one instruction
//!   block.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: compact or
//!   JSON log lines on stderr, plus per-turn traces to an OTLP collector when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod chat_driver;
pub mod generator;
pub mod prompt;
pub mod telemetry;

pub use chat_driver::{ChatDriver, ChatDriverConfig, IncomingMessage};
pub use generator::{OllamaGenerator, SamplingParams, TextGenerator};
