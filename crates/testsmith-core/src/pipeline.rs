//! The public operations: ingest, query, synthesize_script, plus a model
//! health check. A [`Pipeline`] is built once from config and passed around;
//! it holds the model capabilities explicitly so tests can swap in fakes.
//!
//! Operations run to completion one at a time. Ingest rewrites the index that
//! query reads; running them concurrently is the caller's responsibility.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::app_data::DataLayout;
use crate::chunks::chunk_text;
use crate::config::{Config, ConfigError};
use crate::documents::{self, DocKind, IngestError};
use crate::index::{self, build_index};
use crate::ollama::{Completion, Embedder, LanguageModel, ModelError, OllamaClient, OutputMode};
use crate::script::{self, GeneratedScript};
use crate::test_cases::{generate_test_cases, Generation, TestCase};

pub const HEALTH_PROMPT: &str = "Say 'LLM working' in one line.";

/// Result of an ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub chunk_count: usize,
    /// Length in chars of the combined dataset.
    pub processed_len: usize,
}

/// Result of script synthesis as handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptReport {
    pub test_case_id: Option<String>,
    pub code: String,
    pub warnings: Vec<String>,
    pub success: bool,
}

impl ScriptReport {
    fn new(case: &TestCase, script: GeneratedScript) -> Self {
        Self {
            test_case_id: case.id.clone(),
            success: script.success(),
            code: script.code,
            warnings: script.warnings,
        }
    }
}

/// What is on disk right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub data_dir: PathBuf,
    pub ready: bool,
    pub chunk_count: usize,
    pub model: Option<String>,
}

pub struct Pipeline {
    config: Config,
    layout: DataLayout,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
}

impl Pipeline {
    /// Validates `config` and wires in the given capabilities.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = config.data_layout()?;
        Ok(Self {
            config,
            layout,
            embedder,
            model,
        })
    }

    /// Pipeline backed by one Ollama server for both embeddings and generation.
    pub fn with_ollama(config: Config) -> Result<Self, PipelineError> {
        config.validate()?;
        let client = OllamaClient::from_config(&config)?;
        Ok(Self::new(
            config,
            Arc::new(client.clone()),
            Arc::new(client),
        )?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Stages the page and support docs, rebuilds the combined dataset and
    /// replaces the index with one built from it. Files of an unsupported type
    /// are rejected before anything is staged.
    pub async fn ingest(
        &self,
        markup_file: &Path,
        support_files: &[PathBuf],
    ) -> Result<IngestReport, IngestError> {
        documents::check_upload(markup_file, DocKind::PageMarkup)?;
        for doc in support_files {
            documents::check_upload(doc, DocKind::SupportDoc)?;
        }
        documents::stage_file(markup_file, &self.layout.html_dir())?;
        for doc in support_files {
            documents::stage_file(doc, &self.layout.uploads_dir())?;
        }
        let combined = documents::build_combined_dataset(&self.layout)?;
        let chunks = chunk_text(&combined, self.config.chunk_size, self.config.chunk_overlap)?;
        let kb = build_index(chunks, self.embedder.as_ref(), &self.layout).await?;
        let report = IngestReport {
            chunk_count: kb.len(),
            processed_len: combined.chars().count(),
        };
        tracing::info!(
            chunks = report.chunk_count,
            processed_len = report.processed_len,
            support_docs = support_files.len(),
            "ingest complete"
        );
        Ok(report)
    }

    /// Generates test cases for `text`, using `k` context chunks (config
    /// default when `None`).
    pub async fn query(&self, text: &str, k: Option<usize>) -> Generation {
        generate_test_cases(
            &self.layout,
            self.embedder.as_ref(),
            self.model.as_ref(),
            &self.config.structured,
            text,
            k.unwrap_or(self.config.top_k),
        )
        .await
    }

    /// Generates a script for `case`. Without explicit `markup`, the first
    /// staged page (by file name) is used.
    pub async fn synthesize_script(&self, case: &TestCase, markup: Option<&str>) -> ScriptReport {
        let staged;
        let markup = match markup {
            Some(m) => Some(m),
            None => {
                staged = documents::first_markup(&self.layout);
                staged.as_deref()
            }
        };
        let script = script::synthesize(case, markup, self.model.as_ref(), &self.config.script).await;
        ScriptReport::new(case, script)
    }

    /// Sends a tiny prompt to the generation model. Returns its reply or an
    /// `ERROR: ...` line.
    pub async fn check_llm(&self, prompt: &str) -> String {
        let request = Completion {
            prompt: prompt.to_string(),
            mode: OutputMode::Text,
            max_tokens: 200,
            temperature: 0.0,
            top_p: None,
            top_k: None,
        };
        match self.model.complete(&request).await {
            Ok(out) => out,
            Err(e) => format!("ERROR: {e}"),
        }
    }

    pub fn status(&self) -> IndexStatus {
        let kb = index::load_index(&self.layout);
        IndexStatus {
            data_dir: self.layout.root().to_path_buf(),
            ready: kb.is_some(),
            chunk_count: kb.as_ref().map_or(0, |kb| kb.len()),
            model: kb.map(|kb| kb.index().model.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
}
