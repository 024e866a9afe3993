//! Ollama discovery.
//!
//! Pings the configured Ollama server and lists the models it has pulled, so
//! the CLI can tell whether the persona adapter is actually being served
//! before the first mention goes out.

use serde::Deserialize;

/// A model entry from `/api/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

/// Fetch the models available on the Ollama server at `base_url`.
pub fn fetch_models(base_url: &str) -> Result<Vec<OllamaModel>, String> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = reqwest::blocking::get(&url).map_err(|e| format!("Ollama unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }

    let tags: TagsResponse = response
        .json()
        .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;
    Ok(tags.models)
}

/// Whether `model` is among `models`.  A bare name matches its `:latest` tag.
pub fn has_model(models: &[OllamaModel], model: &str) -> bool {
    models
        .iter()
        .any(|m| m.name == model || m.name.strip_suffix(":latest") == Some(model))
}

/// Human-readable size, e.g. `4.1 GB`.
pub fn format_size(bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else {
        format!("{:.0} MB", b / MB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str) -> OllamaModel {
        OllamaModel {
            name: name.to_string(),
            size: 0,
        }
    }

    #[test]
    fn has_model_matches_latest_tag() {
        let models = vec![model("discord-lora:latest"), model("mistral:7b")];
        assert!(has_model(&models, "discord-lora"));
        assert!(has_model(&models, "discord-lora:latest"));
        assert!(has_model(&models, "mistral:7b"));
        assert!(!has_model(&models, "mistral"));
    }

    #[test]
    fn tags_response_tolerates_missing_fields() {
        let tags: TagsResponse = serde_json::from_str(r#"{"models":[{"name":"a"}]}"#).unwrap();
        assert_eq!(tags.models.len(), 1);
        assert_eq!(tags.models[0].size, 0);

        let empty: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.models.is_empty());
    }

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(4_400_000_000), "4.1 GB");
        assert_eq!(format_size(300 * 1024 * 1024), "300 MB");
    }

    #[test]
    fn fetch_models_reports_unreachable_server() {
        // Port 9 (discard) is not an HTTP server.
        assert!(fetch_models("http://127.0.0.1:9").is_err());
    }
}
