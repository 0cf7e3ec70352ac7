//! All backend logic independent of how the app is run.
//!
//! Uploaded pages and support docs are chunked and embedded into a flat L2
//! index in the data directory (see [app_data]). Queries retrieve context
//! from it to generate test cases, and a chosen test case is turned into a
//! Selenium script.

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod index;
pub mod json_extract;
pub mod ollama;
pub mod pipeline;
pub mod script;
pub mod store;
pub mod test_cases;

pub use app_data::{app_data_dir, DataLayout};
pub use chunks::{chunk_text, ChunkError, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use config::{get_data_dir, load_config, save_config, set_data_dir, Config, ConfigError};
pub use documents::{extract_text, DocKind, IngestError};
pub use index::{build_index, load_index, search, IndexError, KnowledgeBase, Retrieval, RetrievedChunk};
pub use json_extract::{extract_first_json, ExtractError};
pub use ollama::{Completion, Embedder, LanguageModel, ModelError, OllamaClient, OutputMode};
pub use pipeline::{IndexStatus, IngestReport, Pipeline, PipelineError, ScriptReport, HEALTH_PROMPT};
pub use script::{synthesize, GeneratedScript};
pub use test_cases::{generate_test_cases, Generation, GenerationReport, TestCase, TestKind};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "testsmith-core ready"
}
