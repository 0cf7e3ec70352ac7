//! Turns one test case into a Selenium (Python) script.
//!
//! The model is asked for raw code only. Its reply is cleaned, checked for a
//! lapse back into JSON, then validated with cheap heuristics. Every warning
//! is also written into the returned code as a comment header.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::ScriptSettings;
use crate::json_extract::strip_fences;
use crate::ollama::{Completion, LanguageModel};
use crate::test_cases::TestCase;

/// Longest markup excerpt placed in the prompt, in chars.
pub const MAX_MARKUP_CHARS: usize = 1500;
const MARKUP_TRUNCATION_MARKER: &str = "\n... [HTML truncated]";
const NO_MARKUP: &str = "(No HTML available)";
const NO_STEPS: &str = "  (No steps provided)";
/// Field name a JSON-wrapped reply is expected to keep its code in.
const CODE_FIELD: &str = "script";

/// Generated code plus everything that looked wrong with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedScript {
    pub code: String,
    pub warnings: Vec<String>,
}

impl GeneratedScript {
    pub fn success(&self) -> bool {
        self.warnings.is_empty()
    }

    fn failure(code: String, warning: impl Into<String>) -> Self {
        Self {
            code,
            warnings: vec![warning.into()],
        }
    }
}

/// Cuts page markup down to something prompt-sized: the `<body>` when the page
/// is too long, then a hard cut at [`MAX_MARKUP_CHARS`].
pub fn markup_snippet(html: &str) -> String {
    if html.chars().count() <= MAX_MARKUP_CHARS {
        return html.to_string();
    }
    let mut snippet = body_of(html).unwrap_or(html);
    if let Some((cut, _)) = snippet.char_indices().nth(MAX_MARKUP_CHARS) {
        snippet = &snippet[..cut];
        return format!("{snippet}{MARKUP_TRUNCATION_MARKER}");
    }
    snippet.to_string()
}

fn body_of(html: &str) -> Option<&str> {
    let re = Regex::new(r"(?is)<body[^>]*>(.*?)</body>").ok()?;
    re.captures(html)?.get(1).map(|m| m.as_str())
}

/// Steps as an indented, 1-based numbered list.
pub fn format_steps(steps: &[String]) -> String {
    if steps.is_empty() {
        return NO_STEPS.to_string();
    }
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("  {}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Code-generation prompt for one test case.
pub fn build_script_prompt(case: &TestCase, markup: &str) -> String {
    let id = case.id.as_deref().unwrap_or("UNKNOWN");
    let kind = case.kind.as_ref().map(|k| k.as_str()).unwrap_or("UNKNOWN");
    let input = case.input.as_deref().unwrap_or("N/A");
    let expected = case.expected_output.as_deref().unwrap_or("N/A");
    let steps = format_steps(&case.steps);
    let markup = if markup.trim().is_empty() { NO_MARKUP } else { markup };

    format!(
        r#"CRITICAL INSTRUCTION: You are now in CODE GENERATION MODE.
Any earlier instruction to answer in JSON no longer applies.

You are a Selenium test automation engineer. Write Python code.

===== YOU MUST =====
- Write executable Python code using Selenium WebDriver
- Start your reply with: from selenium import webdriver
- Include imports, explicit waits and assertions
- Comment each step

===== YOU MUST NOT =====
- Output JSON
- Output dictionaries or lists as data
- Wrap the code in markdown (no ```)
- Add explanations before or after the code
- Start with anything other than a Python import statement

===== TEST CASE TO AUTOMATE =====

Test ID: {id}
Test Type: {kind}
Test Scenario: {input}

Steps to Automate:
{steps}

Expected Result:
{expected}

===== HTML ELEMENTS FOR REFERENCE =====
{markup}

===== OUTPUT REQUIREMENTS =====
- Use Chrome WebDriver
- Include: from selenium import webdriver
- Include: from selenium.webdriver.common.by import By
- Include: from selenium.webdriver.support.ui import WebDriverWait
- Include: from selenium.webdriver.support import expected_conditions as EC
- Locate elements By.ID or By.CSS_SELECTOR taken from the HTML above
- Use try/except/finally
- Assert the expected outcome
- Quit the browser in the finally block

BEGIN PYTHON CODE NOW (the first line must be an import):
"#
    )
}

/// Strips markdown fences. A `python`-tagged block wins over everything
/// around it; otherwise all fence markers are dropped.
pub fn clean_response(raw: &str) -> String {
    let code = raw.trim();
    if code.contains("```python") {
        if let Ok(re) = Regex::new(r"(?s)```python\s*(.*?)\s*```") {
            if let Some(m) = re.captures(code).and_then(|c| c.get(1)) {
                return m.as_str().trim().to_string();
            }
        }
        return code.to_string();
    }
    if code.contains("```") {
        return strip_fences(code);
    }
    code.to_string()
}

/// What a reply turned out to be once checked for JSON.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Code(String),
    /// JSON that carried code in the `script` field.
    Recovered(String),
    /// JSON with no code in it.
    DataOnly(Value),
}

fn classify(code: String) -> Reply {
    let Ok(value) = serde_json::from_str::<Value>(&code) else {
        return Reply::Code(code);
    };
    let field = match &value {
        Value::Object(map) => map.get(CODE_FIELD),
        Value::Array(items) => items.first().and_then(|first| first.get(CODE_FIELD)),
        _ => None,
    };
    match field.and_then(Value::as_str) {
        Some(script) => Reply::Recovered(script.to_string()),
        None => Reply::DataOnly(value),
    }
}

/// Heuristic checks. All run; each failure adds one warning.
pub fn validate(code: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    if !(code.starts_with("from ") || code.starts_with("import ")) {
        warnings.push("Code doesn't start with import statement".to_string());
    }
    let lower = code.to_lowercase();
    if !lower.contains("selenium") && !lower.contains("webdriver") {
        warnings.push("Code doesn't appear to use Selenium".to_string());
    }
    if code.matches('\n').count() < 5 {
        warnings.push("Generated code is suspiciously short".to_string());
    }
    let trimmed = code.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        warnings.push("Response still appears to be JSON-like".to_string());
    }
    warnings
}

fn with_warning_header(code: &str, warnings: &[String]) -> String {
    let mut out = String::from("# WARNING: Generated code may have issues:\n");
    for w in warnings {
        out.push_str("#   - ");
        out.push_str(w);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(code);
    out
}

fn preview(value: &Value) -> String {
    let text = value.to_string();
    match text.char_indices().nth(300) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

/// Generates a script for `case`. `markup` is the page the test runs against,
/// if one is available. Never fails: problems come back as warnings.
pub async fn synthesize(
    case: &TestCase,
    markup: Option<&str>,
    model: &dyn LanguageModel,
    settings: &ScriptSettings,
) -> GeneratedScript {
    let snippet = markup.map(markup_snippet).unwrap_or_default();
    let prompt = build_script_prompt(case, &snippet);
    tracing::debug!(
        case = case.id.as_deref().unwrap_or("UNKNOWN"),
        prompt_chars = prompt.len(),
        "calling model for script"
    );

    let request = Completion::text(
        prompt,
        settings.max_tokens,
        settings.temperature,
        settings.top_p,
        settings.top_k,
    );
    let raw = match model.complete(&request).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "script generation call failed");
            return GeneratedScript::failure(
                format!("# ERROR: Failed to call LLM\n# {e}"),
                format!("LLM call failed: {e}"),
            );
        }
    };
    if raw.trim().is_empty() {
        tracing::warn!("script generation returned nothing");
        return GeneratedScript::failure(
            "# ERROR: Empty response from LLM".to_string(),
            "Empty response from LLM",
        );
    }

    let code = match classify(clean_response(&raw)) {
        Reply::Code(code) => code,
        Reply::Recovered(code) => {
            tracing::warn!("model answered in JSON; using its '{CODE_FIELD}' field");
            code
        }
        Reply::DataOnly(value) => {
            tracing::warn!("model answered in JSON with no code field");
            return GeneratedScript::failure(
                format!(
                    "# ERROR: LLM returned pure JSON with no code field\n\
                     # The model is stuck in JSON output mode.\n\
                     # Retry, or switch to a different generation model.\n\n\
                     # Raw response:\n# {}",
                    preview(&value)
                ),
                "LLM returned JSON instead of code",
            );
        }
    };

    let warnings = validate(&code);
    let code = if warnings.is_empty() {
        code
    } else {
        with_warning_header(&code, &warnings)
    };
    GeneratedScript { code, warnings }
}
