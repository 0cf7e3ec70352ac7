//! Recovers one JSON value from model output wrapped in prose or code fences.
//!
//! Only the payload boundaries are repaired. The payload itself must parse
//! as-is; nothing inside it is guessed or fixed up.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no JSON object or array found in text")]
    NoPayload,
    #[error("no complete JSON found (unmatched '{0}')")]
    Unmatched(char),
    #[error("found JSON structure but failed to parse: {0}")]
    Invalid(String),
}

/// Removes every markdown fence marker and trims the result. A language tag
/// after a marker is removed only when it ends the line, so inline backticks
/// inside a payload keep the text that follows them.
pub fn strip_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.trim();
    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let after = &rest[tag_len..];
        let line = after.split('\n').next().unwrap_or_default();
        if line.trim().is_empty() {
            rest = after.trim_start();
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Extracts the first JSON object or array from `text`.
///
/// Tries the whole (de-fenced) text first. Otherwise the first `{` or `[`
/// picks the bracket pair, and depth is counted for that pair only until it
/// returns to zero.
pub fn extract_first_json(text: &str) -> Result<Value, ExtractError> {
    let text = strip_fences(text);

    if let Ok(v) = serde_json::from_str(&text) {
        return Ok(v);
    }

    let (start, open) = text
        .char_indices()
        .find(|(_, c)| *c == '{' || *c == '[')
        .ok_or(ExtractError::NoPayload)?;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    for (i, c) in text[start..].char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                let candidate = &text[start..start + i + 1];
                return serde_json::from_str(candidate)
                    .map_err(|e| ExtractError::Invalid(e.to_string()));
            }
        }
    }
    Err(ExtractError::Unmatched(open))
}
