//! [`TextGenerator`] – the text-generation collaborator.
//!
//! The persona model is served by an [Ollama](https://ollama.com)-compatible
//! server (`http://localhost:11434`) exposing the raw `/api/generate`
//! endpoint.  The prompt is already fully formatted by
//! [`build_prompt`][crate::prompt::build_prompt], so the request is sent with
//! `raw: true` and no server-side templating.
//!
//! # Example
//!
//! ```rust,no_run
//! use persona_runtime::generator::{OllamaGenerator, SamplingParams, TextGenerator};
//!
//! # async fn demo() {
//! let generator = OllamaGenerator::new("http://localhost:11434", "discord-lora");
//! // Requires a running Ollama instance – skipped in unit tests.
//! // let reply = generator.generate("<s>[INST] hi [/INST]", &SamplingParams::default()).await;
//! # }
//! ```

use async_trait::async_trait;
use persona_memory::summarizer::SummaryBackend;
use persona_types::PersonaError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from text generation.
#[derive(Error, Debug)]
pub enum GeneratorError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be used.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<GeneratorError> for PersonaError {
    fn from(e: GeneratorError) -> Self {
        PersonaError::Generation(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sampling parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Decoding knobs forwarded to the model on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repetition_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 150,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A model that turns a prompt into a reply.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String, GeneratorError>;
}

/// Strip instruction markers and special tokens from a raw model output.
///
/// Keeps only the text after the last `[/INST]` (if any) and removes `<s>`
/// and `</s>`.
pub fn clean_response(raw: &str) -> String {
    let tail = raw.rsplit("[/INST]").next().unwrap_or(raw);
    tail.replace("<s>", "").replace("</s>", "").trim().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
}

impl From<&SamplingParams> for GenerateOptions {
    fn from(p: &SamplingParams) -> Self {
        Self {
            num_predict: p.max_new_tokens,
            temperature: p.temperature,
            top_p: p.top_p,
            top_k: p.top_k,
            repeat_penalty: p.repetition_penalty,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// OllamaGenerator
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for Ollama's `/api/generate` endpoint.
///
/// Construct once and share across chat turns.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    /// Create a new generator pointing at `base_url` (e.g.
    /// `"http://localhost:11434"`) and using `model`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    /// # Errors
    ///
    /// Returns [`GeneratorError::Http`] if the request fails, or
    /// [`GeneratorError::BadResponse`] if the body cannot be decoded.
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String, GeneratorError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            raw: true,
            stream: false,
            options: params.into(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let parsed: GenerateResponse =
            serde_json::from_str(&response).map_err(|e| GeneratorError::BadResponse(e.to_string()))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl SummaryBackend for OllamaGenerator {
    async fn summarize(&self, text: &str, max_length: usize, _min_length: usize) -> Result<String, PersonaError> {
        let prompt = format!("<s>[INST] Summarize the following conversation in a few sentences.\n\n{text} [/INST]");
        let params = SamplingParams {
            max_new_tokens: u32::try_from(max_length).unwrap_or(u32::MAX),
            temperature: 0.2,
            ..SamplingParams::default()
        };
        let raw = self.generate(&prompt, &params).await?;
        Ok(clean_response(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sampling_params() {
        let p = SamplingParams::default();
        assert_eq!(p.max_new_tokens, 150);
        assert!((p.temperature - 0.7).abs() < f32::EPSILON);
        assert!((p.top_p - 0.9).abs() < f32::EPSILON);
        assert_eq!(p.top_k, 40);
        assert!((p.repetition_penalty - 1.1).abs() < f32::EPSILON);
    }

    #[test]
    fn request_body_maps_sampling_options() {
        let params = SamplingParams::default();
        let body = GenerateRequest {
            model: "discord-lora",
            prompt: "hi",
            raw: true,
            stream: false,
            options: (&params).into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "discord-lora");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 150);
        assert_eq!(json["options"]["top_k"], 40);
        assert!(json["options"].get("repeat_penalty").is_some());
    }

    #[test]
    fn clean_response_keeps_text_after_last_inst() {
        let raw = "<s>[INST] system\n\nA: hi [/INST] hey whats up</s>";
        assert_eq!(clean_response(raw), "hey whats up");
    }

    #[test]
    fn clean_response_without_markers_is_trimmed() {
        assert_eq!(clean_response("  lol ok \n"), "lol ok");
        assert_eq!(clean_response("<s></s>"), "");
    }

    #[test]
    fn generator_error_maps_to_persona_error() {
        let err: PersonaError = GeneratorError::BadResponse("empty".into()).into();
        assert!(matches!(err, PersonaError::Generation(_)));
    }

    #[test]
    fn ollama_generator_constructed_without_panic() {
        let generator = OllamaGenerator::new("http://localhost:11434", "discord-lora");
        assert_eq!(generator.model(), "discord-lora");
    }
}
