//! Persisted config (data directory, models, generation settings) in the app data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data::{self, DataLayout};
use crate::chunks::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

const CONFIG_FILENAME: &str = "config.toml";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";
pub const DEFAULT_GENERATION_MODEL: &str = "llama3.1";
pub const DEFAULT_TOP_K: usize = 6;

/// Decoding settings for the structured (JSON) test case call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for StructuredSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1200,
            temperature: 0.4,
        }
    }
}

/// Decoding settings for free-form script generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where uploads and the index live. Falls back to the app data directory.
    pub data_dir: Option<String>,
    pub ollama_url: String,
    /// Pinned embedding model; the same one must serve build and query.
    pub embed_model: String,
    pub generation_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub structured: StructuredSettings,
    pub script: ScriptSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            structured: StructuredSettings::default(),
            script: ScriptSettings::default(),
        }
    }
}

impl Config {
    /// Rejects settings that can never work. Called before any pipeline operation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be > 0".into()));
        }
        if self.embed_model.trim().is_empty() {
            return Err(ConfigError::Invalid("embed_model is empty".into()));
        }
        if self.generation_model.trim().is_empty() {
            return Err(ConfigError::Invalid("generation_model is empty".into()));
        }
        let url = self.ollama_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "ollama_url must start with http:// or https://, got {url:?}"
            )));
        }
        for (name, t) in [
            ("structured.temperature", self.structured.temperature),
            ("script.temperature", self.script.temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::Invalid(format!("{name} out of range: {t}")));
            }
        }
        Ok(())
    }

    /// Resolves the data directory: configured path, else the app data directory.
    pub fn data_layout(&self) -> Result<DataLayout, ConfigError> {
        match self.data_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => Ok(DataLayout::new(dir)),
            None => app_data::app_data_dir()
                .map(DataLayout::new)
                .ok_or(ConfigError::NoDataDir),
        }
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    load_config_from(&data_dir.join(CONFIG_FILENAME))
}

/// Load config from an explicit file. Returns default config if missing or invalid.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(s) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match toml::from_str(&s) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
            Config::default()
        }
    }
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    let path = data_dir.join(CONFIG_FILENAME);
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(&path, s).map_err(ConfigError::Write)
}

/// Get the configured data directory, if any.
pub fn get_data_dir() -> Option<PathBuf> {
    load_config()
        .data_dir
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Set and persist the data directory. Creates it if needed.
pub fn set_data_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(path).map_err(ConfigError::Write)?;
    let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path));
    }
    let mut config = load_config();
    config.data_dir = Some(path.to_string_lossy().into_owned());
    save_config(&config)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}
