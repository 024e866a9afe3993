//! Configuration Vault – reads/writes `~/.persona/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use persona_memory::embedder::{Embedder, HashingEmbedder, OllamaEmbedder};
use persona_memory::long_term::{DEFAULT_COLLECTION, LongTermConfig};
use persona_runtime::prompt::DEFAULT_PERSONA;
use persona_runtime::{ChatDriverConfig, SamplingParams};
use persona_types::PersonaError;

/// Embedding backend used to index long-term memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Local feature hashing; no server required.
    #[default]
    Hashing,
    /// Ollama `/api/embeddings`.
    Ollama,
}

impl std::fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedderKind::Hashing => write!(f, "hashing"),
            EmbedderKind::Ollama => write!(f, "ollama"),
        }
    }
}

/// Persisted user configuration stored in `~/.persona/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Ollama instance serving the persona model.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model name of the fine-tuned persona (e.g. "discord-lora").
    #[serde(default = "default_model")]
    pub active_model: String,

    /// Display name of the bot; `@<bot_name>` in a message is a mention.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Persona line opening every prompt.
    #[serde(default = "default_persona")]
    pub persona: String,

    // ── Short-term memory ────────────────────────────────────────────────────
    #[serde(default = "default_short_term_window")]
    pub short_term_window: usize,

    #[serde(default = "default_short_term_max_context")]
    pub short_term_max_context: usize,

    // ── Long-term memory ─────────────────────────────────────────────────────
    #[serde(default)]
    pub enable_long_term_memory: bool,

    #[serde(default = "default_long_term_db_path")]
    pub long_term_db_path: String,

    #[serde(default = "default_long_term_top_k")]
    pub long_term_top_k: usize,

    #[serde(default)]
    pub embedder: EmbedderKind,

    /// Embedding model used when `embedder = "ollama"`.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    // ── Sampling ─────────────────────────────────────────────────────────────
    #[serde(default)]
    pub sampling: SamplingParams,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "discord-lora".to_string()
}
fn default_bot_name() -> String {
    "sususbot".to_string()
}
fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}
fn default_short_term_window() -> usize {
    20
}
fn default_short_term_max_context() -> usize {
    10
}
fn default_long_term_db_path() -> String {
    "data/vector_db".to_string()
}
fn default_long_term_top_k() -> usize {
    3
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            active_model: default_model(),
            bot_name: default_bot_name(),
            persona: default_persona(),
            short_term_window: default_short_term_window(),
            short_term_max_context: default_short_term_max_context(),
            enable_long_term_memory: false,
            long_term_db_path: default_long_term_db_path(),
            long_term_top_k: default_long_term_top_k(),
            embedder: EmbedderKind::default(),
            embedding_model: default_embedding_model(),
            sampling: SamplingParams::default(),
        }
    }
}

impl Config {
    /// Build the chat driver configuration described by this file.
    pub fn driver_config(&self) -> ChatDriverConfig {
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
            EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(&self.ollama_url, &self.embedding_model)),
        };
        ChatDriverConfig {
            short_term_window: self.short_term_window,
            short_term_max_context: self.short_term_max_context,
            enable_long_term: self.enable_long_term_memory,
            long_term: LongTermConfig {
                db_path: PathBuf::from(&self.long_term_db_path),
                collection: DEFAULT_COLLECTION.to_string(),
                embedder,
            },
            long_term_top_k: self.long_term_top_k,
            sampling: self.sampling.clone(),
            bot_user_id: 0,
            bot_name: self.bot_name.clone(),
            persona: self.persona.clone(),
        }
    }
}

/// Return the path to `~/.persona/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".persona").join("config.toml")
}

/// Load the config from disk and apply `PERSONA_*` overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, PersonaError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, PersonaError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| PersonaError::Config(format!("failed to read config at {}: {}", path.display(), e)))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| PersonaError::Config(format!("failed to parse config: {}", e)))?;
    Ok(Some(cfg))
}

/// Apply `PERSONA_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `PERSONA_OLLAMA_URL` | `ollama_url` |
/// | `PERSONA_MODEL` | `active_model` |
/// | `PERSONA_SHORT_TERM_WINDOW` | `short_term_window` |
/// | `PERSONA_SHORT_TERM_MAX_CONTEXT` | `short_term_max_context` |
/// | `PERSONA_ENABLE_LONG_TERM_MEMORY` | `enable_long_term_memory` (`true`/`false`) |
/// | `PERSONA_LONG_TERM_DB_PATH` | `long_term_db_path` |
/// | `PERSONA_LONG_TERM_TOP_K` | `long_term_top_k` |
/// | `PERSONA_MAX_NEW_TOKENS` | `sampling.max_new_tokens` |
/// | `PERSONA_TEMPERATURE` | `sampling.temperature` |
/// | `PERSONA_TOP_P` | `sampling.top_p` |
/// | `PERSONA_TOP_K` | `sampling.top_k` |
/// | `PERSONA_REPETITION_PENALTY` | `sampling.repetition_penalty` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PERSONA_OLLAMA_URL") {
        cfg.ollama_url = v;
    }
    if let Ok(v) = std::env::var("PERSONA_MODEL") {
        cfg.active_model = v;
    }
    if let Ok(v) = std::env::var("PERSONA_LONG_TERM_DB_PATH") {
        cfg.long_term_db_path = v;
    }
    override_parsed("PERSONA_SHORT_TERM_WINDOW", &mut cfg.short_term_window);
    override_parsed("PERSONA_SHORT_TERM_MAX_CONTEXT", &mut cfg.short_term_max_context);
    override_parsed("PERSONA_LONG_TERM_TOP_K", &mut cfg.long_term_top_k);
    override_parsed("PERSONA_MAX_NEW_TOKENS", &mut cfg.sampling.max_new_tokens);
    override_parsed("PERSONA_TEMPERATURE", &mut cfg.sampling.temperature);
    override_parsed("PERSONA_TOP_P", &mut cfg.sampling.top_p);
    override_parsed("PERSONA_TOP_K", &mut cfg.sampling.top_k);
    override_parsed("PERSONA_REPETITION_PENALTY", &mut cfg.sampling.repetition_penalty);
    if let Ok(v) = std::env::var("PERSONA_ENABLE_LONG_TERM_MEMORY") {
        cfg.enable_long_term_memory = v.eq_ignore_ascii_case("true");
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, field: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.trim().parse::<T>()
    {
        *field = parsed;
    }
}

/// Save the config to disk, creating `~/.persona/` if necessary.
pub fn save(cfg: &Config) -> Result<(), PersonaError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), PersonaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PersonaError::Config(format!("failed to create config directory: {}", e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| PersonaError::Config(format!("failed to set config directory permissions: {}", e)))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PersonaError::Config(format!("failed to serialize config: {}", e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| PersonaError::Config(format!("failed to write config at {}: {}", path.display(), e)))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| PersonaError::Config(format!("failed to write config at {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.short_term_window, 20);
        assert_eq!(loaded.short_term_max_context, 10);
        assert_eq!(loaded.long_term_top_k, 3);
        assert_eq!(loaded.active_model, "discord-lora");
        assert_eq!(loaded.embedder, EmbedderKind::Hashing);
        assert_eq!(loaded.sampling, SamplingParams::default());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bot_name = \"parrot\"\nenable_long_term_memory = true\n").unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.bot_name, "parrot");
        assert!(cfg.enable_long_term_memory);
        assert_eq!(cfg.long_term_db_path, "data/vector_db");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "short_term_window = \"lots\"").unwrap();
        assert!(matches!(load_from(&path), Err(PersonaError::Config(_))));
    }

    #[test]
    fn config_path_points_to_persona_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".persona"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn driver_config_mirrors_file() {
        let cfg = Config {
            short_term_window: 7,
            enable_long_term_memory: true,
            long_term_db_path: "/tmp/mem".to_string(),
            ..Config::default()
        };
        let driver = cfg.driver_config();
        assert_eq!(driver.short_term_window, 7);
        assert!(driver.enable_long_term);
        assert_eq!(driver.long_term.db_path, PathBuf::from("/tmp/mem"));
        assert_eq!(driver.long_term.collection, DEFAULT_COLLECTION);
        assert_eq!(driver.long_term.embedder.model_name(), "feature-hashing");
        assert_eq!(driver.bot_name, "sususbot");
    }

    // Env-var tests touch distinct variables so they do not race each other.

    #[test]
    fn apply_env_overrides_changes_ollama_url() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_OLLAMA_URL", "http://gpu-box:11434") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ollama_url, "http://gpu-box:11434");
        unsafe { std::env::remove_var("PERSONA_OLLAMA_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_window() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_SHORT_TERM_WINDOW", "50") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.short_term_window, 50);
        unsafe { std::env::remove_var("PERSONA_SHORT_TERM_WINDOW") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_number() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_LONG_TERM_TOP_K", "several") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.long_term_top_k, 3);
        unsafe { std::env::remove_var("PERSONA_LONG_TERM_TOP_K") };
    }

    #[test]
    fn apply_env_overrides_toggles_long_term() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_ENABLE_LONG_TERM_MEMORY", "TRUE") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.enable_long_term_memory);
        unsafe { std::env::remove_var("PERSONA_ENABLE_LONG_TERM_MEMORY") };
    }

    #[test]
    fn apply_env_overrides_changes_temperature() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_TEMPERATURE", "1.2") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!((cfg.sampling.temperature - 1.2).abs() < f32::EPSILON);
        unsafe { std::env::remove_var("PERSONA_TEMPERATURE") };
    }

    #[test]
    fn embedder_kind_displays_its_config_name() {
        for kind in [EmbedderKind::Hashing, EmbedderKind::Ollama] {
            let toml_name = toml::to_string(&Config { embedder: kind.clone(), ..Config::default() }).unwrap();
            assert!(toml_name.contains(&format!("embedder = \"{kind}\"")));
        }
    }

    #[test]
    fn apply_env_overrides_changes_top_p() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_TOP_P", "0.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!((cfg.sampling.top_p - 0.5).abs() < f32::EPSILON);
        unsafe { std::env::remove_var("PERSONA_TOP_P") };
    }

    #[test]
    fn apply_env_overrides_changes_top_k() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_TOP_K", " 12 ") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.sampling.top_k, 12);
        unsafe { std::env::remove_var("PERSONA_TOP_K") };
    }

    #[test]
    fn apply_env_overrides_changes_repetition_penalty() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("PERSONA_REPETITION_PENALTY", "1.3") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!((cfg.sampling.repetition_penalty - 1.3).abs() < f32::EPSILON);
        assert_eq!(cfg.driver_config().sampling.repetition_penalty, cfg.sampling.repetition_penalty);
        unsafe { std::env::remove_var("PERSONA_REPETITION_PENALTY") };
    }
}
