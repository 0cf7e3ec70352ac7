//! Retrieval-grounded test case generation.
//!
//! Retrieve → numbered context blocks → one JSON-only prompt → structured
//! model call → tolerant parse. Every outcome, including failures, comes back
//! as a [`Generation`] value; nothing here returns an error.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::app_data::DataLayout;
use crate::config::StructuredSettings;
use crate::index::{self, Retrieval, RetrievedChunk};
use crate::json_extract::extract_first_json;
use crate::ollama::{Completion, Embedder, LanguageModel};

/// Longest chunk excerpt placed in the prompt, in chars.
pub const MAX_SNIPPET_CHARS: usize = 800;
const TRUNCATION_MARKER: &str = " ...[truncated]...";

pub const NOT_READY_MESSAGE: &str =
    "Vector DB not ready. Please upload files and build knowledge base.";

/// Positive or negative scenario. Anything else the model invents is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestKind {
    Positive,
    Negative,
    Other(String),
}

impl From<String> for TestKind {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => TestKind::Positive,
            "negative" => TestKind::Negative,
            _ => TestKind::Other(s),
        }
    }
}

impl From<TestKind> for String {
    fn from(kind: TestKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TestKind {
    pub fn as_str(&self) -> &str {
        match self {
            TestKind::Positive => "positive",
            TestKind::Negative => "negative",
            TestKind::Other(s) => s.as_str(),
        }
    }
}

/// One generated test case. Missing fields are tolerated; the model does not
/// always fill every one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
///
/// Models are loose about types: a numeric `id` or an object `input` is kept
/// as its JSON text rather than rejected.
pub struct TestCase {
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<TestKind>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub input: Option<String>,
    #[serde(default, deserialize_with = "lenient_steps")]
    pub steps: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_output: Option<String>,
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(value_text))
}

fn lenient_kind<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TestKind>, D::Error> {
    Ok(lenient_string(d)?.map(TestKind::from))
}

/// A list of steps, a single step string, or nothing.
fn lenient_steps<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Array(items)) => items.into_iter().filter_map(value_text).collect(),
        Some(other) => value_text(other).into_iter().collect(),
        None => Vec::new(),
    })
}

/// Outcome of one generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    /// No index has been built; the model was not called.
    NotReady,
    /// The query could not be embedded; the model was not called.
    RetrievalFailed { error: String },
    /// The model output contained a JSON payload.
    Parsed {
        raw: String,
        value: Value,
        context: Vec<String>,
    },
    /// The model output had no recoverable payload.
    ParseFailed {
        raw: String,
        error: String,
        context: Vec<String>,
    },
}

impl Generation {
    pub fn raw(&self) -> Option<&str> {
        match self {
            Generation::Parsed { raw, .. } | Generation::ParseFailed { raw, .. } => {
                Some(raw.as_str())
            }
            _ => None,
        }
    }

    pub fn parsed(&self) -> Option<&Value> {
        match self {
            Generation::Parsed { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Generation::NotReady => Some(NOT_READY_MESSAGE),
            Generation::RetrievalFailed { error } | Generation::ParseFailed { error, .. } => {
                Some(error.as_str())
            }
            Generation::Parsed { .. } => None,
        }
    }

    pub fn context(&self) -> &[String] {
        match self {
            Generation::Parsed { context, .. } | Generation::ParseFailed { context, .. } => {
                context.as_slice()
            }
            _ => &[],
        }
    }

    /// Test cases found in the payload, from `{"test_cases": [...]}` or a bare
    /// array. Entries that are not JSON objects are skipped with a warning.
    pub fn test_cases(&self) -> Vec<TestCase> {
        let Some(value) = self.parsed() else {
            return Vec::new();
        };
        let items = match value {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => match map.get("test_cases") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => return Vec::new(),
            },
            _ => return Vec::new(),
        };
        let cases: Vec<TestCase> = items
            .iter()
            .filter(|v| v.is_object())
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
        if cases.len() < items.len() {
            tracing::warn!(
                skipped = items.len() - cases.len(),
                "payload entries are not test case objects"
            );
        }
        cases
    }
}

/// Flat, serializable view of a [`Generation`] with all four fields present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub raw_llm: Option<String>,
    pub parsed: Option<Value>,
    pub error: Option<String>,
    pub context_used: Vec<String>,
}

impl From<&Generation> for GenerationReport {
    fn from(g: &Generation) -> Self {
        Self {
            raw_llm: g.raw().map(str::to_string),
            parsed: g.parsed().cloned(),
            error: g.error().map(str::to_string),
            context_used: g.context().to_vec(),
        }
    }
}

/// Formats hits as `[CHUNK n | distance=d]` blocks, each excerpt capped at
/// [`MAX_SNIPPET_CHARS`].
pub fn context_blocks(hits: &[RetrievedChunk]) -> Vec<String> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let snippet = hit.text.trim();
            let snippet = match snippet.char_indices().nth(MAX_SNIPPET_CHARS) {
                Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &snippet[..cut]),
                None => snippet.to_string(),
            };
            format!("[CHUNK {} | distance={}]\n{}", i + 1, hit.distance, snippet)
        })
        .collect()
}

/// The full generation prompt: JSON-only instructions, context, then the request.
pub fn build_prompt(context: &str, user_request: &str) -> String {
    format!(
        r#"You are a test case generator for web applications.
Generate structured test cases using ONLY the context below. The task is purely technical.

Respond with valid JSON only. No explanation, no markdown, no text before or after the JSON.

The JSON must have exactly this shape:

{{
  "test_cases": [
    {{
      "id": "TC001",
      "type": "positive or negative",
      "input": "input description",
      "steps": ["step 1", "step 2"],
      "expected_output": "expected system behavior"
    }}
  ]
}}

------------------------
CONTEXT:
{context}
------------------------

USER REQUEST:
{user_request}

RULES:
- Do not add any explanation.
- Do not add text after the JSON.
- Do not truncate. The reply must be one complete JSON object.
- If the reply would be too long, return FEWER test cases instead of cutting the JSON.
Generate the test cases now.
"#
    )
}

/// Runs retrieval-grounded generation for `query` with `k` context chunks.
pub async fn generate_test_cases(
    layout: &DataLayout,
    embedder: &dyn Embedder,
    model: &dyn LanguageModel,
    settings: &StructuredSettings,
    query: &str,
    k: usize,
) -> Generation {
    let hits = match index::search(layout, embedder, query, k).await {
        Ok(Retrieval::NotReady) => return Generation::NotReady,
        Ok(Retrieval::Hits(hits)) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval failed");
            return Generation::RetrievalFailed {
                error: format!("retrieval failed: {e}"),
            };
        }
    };

    let context = context_blocks(&hits);
    let prompt = build_prompt(&context.join("\n\n"), query);
    tracing::debug!(blocks = context.len(), prompt_chars = prompt.len(), "calling model for test cases");

    let request = Completion::structured(prompt, settings.max_tokens, settings.temperature);
    let raw = match model.complete(&request).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "test case generation call failed");
            String::new()
        }
    };

    match extract_first_json(&raw) {
        Ok(value) => Generation::Parsed {
            raw,
            value,
            context,
        },
        Err(e) => {
            tracing::warn!(error = %e, raw_chars = raw.len(), "model output not parseable");
            Generation::ParseFailed {
                raw,
                error: format!("JSON parsing failed: {e}"),
                context,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::index::build_index;
    use crate::index::tests::HashEmbedder;
    use crate::ollama::{ModelError, OutputMode};

    /// Replies with a fixed string (or fails) and remembers what it was asked.
    pub(crate) struct ScriptedModel {
        reply: Option<String>,
        pub calls: AtomicUsize,
        pub last: Mutex<Option<Completion>>,
    }

    impl ScriptedModel {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn last_request(&self) -> Completion {
            self.last.lock().unwrap().clone().expect("model was called")
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: &Completion) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            self.reply.clone().ok_or(ModelError::Empty)
        }
    }

    async fn built_layout(dir: &tempfile::TempDir) -> DataLayout {
        let layout = DataLayout::new(dir.path());
        let chunks = vec![
            "Discount code SAVE15 applies 15% off".to_string(),
            "Email field is required on checkout".to_string(),
        ];
        build_index(chunks, &HashEmbedder::new(), &layout).await.unwrap();
        layout
    }

    #[tokio::test]
    async fn not_ready_skips_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let model = ScriptedModel::replying("{}");
        let g = generate_test_cases(
            &layout,
            &HashEmbedder::new(),
            &model,
            &StructuredSettings::default(),
            "discount tests",
            6,
        )
        .await;
        assert_eq!(g, Generation::NotReady);
        assert!(g.parsed().is_none());
        assert_eq!(g.error(), Some(NOT_READY_MESSAGE));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn wrapped_payload_is_parsed_and_context_returned() {
        let dir = tempfile::tempdir().unwrap();
        let layout = built_layout(&dir).await;
        let reply = r#"Sure! {"test_cases": [{"id": "TC001", "type": "positive", "input": "SAVE15", "steps": ["open checkout", "apply code"], "expected_output": "15% off"}]} hope this helps"#;
        let model = ScriptedModel::replying(reply);
        let g = generate_test_cases(
            &layout,
            &HashEmbedder::new(),
            &model,
            &StructuredSettings::default(),
            "discount code",
            6,
        )
        .await;
        assert_eq!(model.calls(), 1);
        assert_eq!(g.raw(), Some(reply));
        assert!(g.error().is_none());
        assert_eq!(g.context().len(), 2);
        assert!(g.context()[0].starts_with("[CHUNK 1 | distance="));

        let cases = g.test_cases();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].kind, Some(TestKind::Positive));
        assert_eq!(cases[0].steps, vec!["open checkout", "apply code"]);

        let req = model.last_request();
        assert_eq!(req.mode, OutputMode::Structured);
        assert_eq!(req.max_tokens, 1200);
        assert_eq!(req.temperature, 0.4);
        assert!(req.prompt.contains("USER REQUEST:\ndiscount code"));
        assert!(req.prompt.contains("SAVE15"));
    }

    #[tokio::test]
    async fn model_failure_becomes_parse_failure_with_empty_raw() {
        let dir = tempfile::tempdir().unwrap();
        let layout = built_layout(&dir).await;
        let model = ScriptedModel::failing();
        let g = generate_test_cases(
            &layout,
            &HashEmbedder::new(),
            &model,
            &StructuredSettings::default(),
            "anything",
            6,
        )
        .await;
        assert_eq!(g.raw(), Some(""));
        assert!(g.parsed().is_none());
        assert!(g.error().unwrap().starts_with("JSON parsing failed"));
        assert_eq!(g.context().len(), 2);
    }

    #[tokio::test]
    async fn truncated_output_is_reported_not_patched() {
        let dir = tempfile::tempdir().unwrap();
        let layout = built_layout(&dir).await;
        let model = ScriptedModel::replying(r#"{"test_cases": [{"id": "TC001", "steps": ["a""#);
        let g = generate_test_cases(
            &layout,
            &HashEmbedder::new(),
            &model,
            &StructuredSettings::default(),
            "checkout",
            6,
        )
        .await;
        assert!(matches!(g, Generation::ParseFailed { .. }));
        let report = GenerationReport::from(&g);
        assert!(report.parsed.is_none());
        assert!(report.raw_llm.is_some());
        assert!(report.error.is_some());
    }

    #[test]
    fn long_chunks_are_truncated_with_marker() {
        let hits = vec![RetrievedChunk {
            text: format!("  {}  ", "x".repeat(900)),
            distance: 1.5,
        }];
        let blocks = context_blocks(&hits);
        let body = blocks[0].strip_prefix("[CHUNK 1 | distance=1.5]\n").unwrap();
        assert_eq!(body, format!("{}{TRUNCATION_MARKER}", "x".repeat(800)));
    }

    #[test]
    fn chunk_of_exactly_max_len_is_not_marked() {
        let hits = vec![RetrievedChunk {
            text: "y".repeat(MAX_SNIPPET_CHARS),
            distance: 0.0,
        }];
        assert!(!context_blocks(&hits)[0].contains("truncated"));
    }

    #[test]
    fn bare_array_payload_yields_cases_and_skips_junk() {
        let g = Generation::Parsed {
            raw: String::new(),
            value: json!([{"id": "TC9", "type": "Negative"}, 42, {"steps": "not a list"}]),
            context: Vec::new(),
        };
        let cases = g.test_cases();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].kind, Some(TestKind::Negative));
        assert_eq!(cases[1].steps, vec!["not a list".to_string()]);
    }

    #[test]
    fn loosely_typed_fields_are_kept_as_text() {
        let g = Generation::Parsed {
            raw: String::new(),
            value: json!({"test_cases": [
                {"id": 1, "type": "positive", "input": "SAVE15",
                 "steps": ["Open checkout", 2], "expected_output": "15% off"},
                {"id": "TC002", "type": "negative", "input": {"code": "BOGUS"},
                 "steps": ["Enter code"], "expected_output": null}
            ]}),
            context: Vec::new(),
        };
        let cases = g.test_cases();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id.as_deref(), Some("1"));
        assert_eq!(cases[0].steps, vec!["Open checkout".to_string(), "2".to_string()]);
        assert_eq!(cases[1].input.as_deref(), Some(r#"{"code":"BOGUS"}"#));
        assert_eq!(cases[1].expected_output, None);
    }

    #[test]
    fn unknown_kind_is_kept() {
        let case: TestCase = serde_json::from_value(json!({"type": "edge"})).unwrap();
        assert_eq!(case.kind, Some(TestKind::Other("edge".into())));
        assert_eq!(serde_json::to_value(&case).unwrap()["type"], "edge");
    }
}
