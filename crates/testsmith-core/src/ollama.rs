//! Model capabilities and their Ollama adapters.
//!
//! The pipeline only sees [`Embedder`] and [`LanguageModel`]. [`OllamaClient`]
//! implements both on top of ollama-rs; tests plug in fakes.

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::generation::parameters::FormatType;
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use thiserror::Error;

use crate::config::Config;

/// Turns text into fixed-dimension vectors. One model per implementation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the pinned embedding model.
    fn model_name(&self) -> &str;

    /// Embed multiple strings. Returns one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;

    /// Embed a single string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(ModelError::Empty)
    }
}

/// Output mode requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Ask the provider to constrain output to JSON.
    Structured,
    /// Plain text.
    Text,
}

/// One text-generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub prompt: String,
    pub mode: OutputMode,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl Completion {
    /// `generate_structured(prompt, max_tokens, temperature)`.
    pub fn structured(prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            mode: OutputMode::Structured,
            max_tokens,
            temperature,
            top_p: None,
            top_k: None,
        }
    }

    /// `generate_text(prompt, max_tokens, temperature, top_p, top_k)`.
    pub fn text(
        prompt: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
        top_p: f32,
        top_k: u32,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            mode: OutputMode::Text,
            max_tokens,
            temperature,
            top_p: Some(top_p),
            top_k: Some(top_k),
        }
    }
}

/// Text generation. Provider faults come back as [`ModelError`]; callers
/// decide how to degrade.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &Completion) -> Result<String, ModelError>;
}

/// Thin wrapper around Ollama for embedding and completion.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
    generation_model: String,
}

impl OllamaClient {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, ModelError> {
        let inner = Ollama::try_new(url).map_err(ModelError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: crate::config::DEFAULT_EMBED_MODEL.to_string(),
            generation_model: crate::config::DEFAULT_GENERATION_MODEL.to_string(),
        })
    }

    /// Create from config: URL and both model names.
    pub fn from_config(config: &Config) -> Result<Self, ModelError> {
        Ok(Self::from_url(&config.ollama_url)?
            .with_embed_model(&config.embed_model)
            .with_generation_model(&config.generation_model))
    }

    /// Set the embedding model (e.g. `all-minilm`, `nomic-embed-text`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Set the completion model (e.g. `llama3.1`, `qwen2.5-coder`).
    pub fn with_generation_model(mut self, model: impl Into<String>) -> Self {
        self.generation_model = model.into();
        self
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn model_name(&self) -> &str {
        &self.embed_model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(ModelError::Request)?;
        if res.embeddings.len() != texts.len() {
            return Err(ModelError::CountMismatch {
                got: res.embeddings.len(),
                want: texts.len(),
            });
        }
        Ok(res.embeddings)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, request: &Completion) -> Result<String, ModelError> {
        let mut options = ModelOptions::default()
            .temperature(request.temperature)
            .num_predict(i32::try_from(request.max_tokens).unwrap_or(i32::MAX));
        if let Some(top_p) = request.top_p {
            options = options.top_p(top_p);
        }
        if let Some(top_k) = request.top_k {
            options = options.top_k(top_k);
        }
        let mut req = GenerationRequest::new(self.generation_model.clone(), request.prompt.clone())
            .options(options);
        if request.mode == OutputMode::Structured {
            req = req.format(FormatType::Json);
        }
        let res = self.inner.generate(req).await.map_err(ModelError::Request)?;
        Ok(res.response)
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
    #[error("embedding count mismatch: got {got}, want {want}")]
    CountMismatch { got: usize, want: usize },
    #[error("model returned no output")]
    Empty,
}
