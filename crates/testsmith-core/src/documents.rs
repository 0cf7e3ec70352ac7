//! Uploaded documents: staging them into the data directory and turning them
//! into one combined plain-text dataset.
//!
//! Uploads accumulate across ingests; the dataset is always rebuilt from
//! everything staged so far.

use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::app_data::DataLayout;

/// What an uploaded file is to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    /// The page under test (`.html`).
    PageMarkup,
    /// Requirements, specs, notes (`.txt`, `.md`, `.json`, `.pdf`).
    SupportDoc,
}

const MARKUP_EXTENSIONS: &[&str] = &["html", "htm"];
const SUPPORT_EXTENSIONS: &[&str] = &["txt", "md", "json", "pdf"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_markup(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| MARKUP_EXTENSIONS.contains(&e.as_str()))
}

fn is_support(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| SUPPORT_EXTENSIONS.contains(&e.as_str()))
}

/// Extracts clean text from `path`. Never fails: a failure is described in
/// the returned text so that concatenation downstream keeps working.
pub fn extract_text(path: &Path, kind: DocKind) -> String {
    let name = path.display();
    if extension_of(path).as_deref() == Some("pdf") {
        return match pdf_extract::extract_text(path) {
            Ok(text) => normalize_lines(&text),
            Err(e) => format!("[extraction failed for {name}: {e}]"),
        };
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return format!("[extraction failed for {name}: {e}]"),
    };
    let text = String::from_utf8_lossy(&bytes);
    match kind {
        DocKind::PageMarkup => html_to_text(&text),
        DocKind::SupportDoc => text.into_owned(),
    }
}

/// Visible text of an HTML page, one trimmed line per text run.
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in [
        r"(?is)<!--.*?-->",
        r"(?is)<script\b[^>]*>.*?</script\s*>",
        r"(?is)<style\b[^>]*>.*?</style\s*>",
        r"(?is)<noscript\b[^>]*>.*?</noscript\s*>",
        r"(?is)<meta\b[^>]*>",
        r"(?s)<[^>]*>",
    ] {
        if let Ok(re) = Regex::new(pattern) {
            text = re.replace_all(&text, "\n").into_owned();
        }
    }
    normalize_lines(&decode_entities(&text))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rejects an upload whose extension will never be read back for `kind`.
pub fn check_upload(path: &Path, kind: DocKind) -> Result<(), IngestError> {
    let accepted = match kind {
        DocKind::PageMarkup => is_markup(path),
        DocKind::SupportDoc => is_support(path),
    };
    if accepted {
        Ok(())
    } else {
        Err(IngestError::Unsupported(path.to_path_buf(), kind))
    }
}

/// Copies `src` into `dest_dir` under its own file name.
pub fn stage_file(src: &Path, dest_dir: &Path) -> Result<PathBuf, IngestError> {
    if !src.is_file() {
        return Err(IngestError::NotAFile(src.to_path_buf()));
    }
    let name = src
        .file_name()
        .ok_or_else(|| IngestError::NotAFile(src.to_path_buf()))?;
    std::fs::create_dir_all(dest_dir).map_err(|e| IngestError::Write(dest_dir.to_path_buf(), e))?;
    let dest = dest_dir.join(name);
    std::fs::copy(src, &dest).map_err(|e| IngestError::Copy(src.to_path_buf(), e))?;
    Ok(dest)
}

/// Files in `dir` (not recursive) accepted by `keep`, sorted by name.
/// A missing directory yields no files.
fn list_files(dir: &Path, keep: fn(&Path) -> bool) -> Result<Vec<PathBuf>, IngestError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| IngestError::Walk(e.to_string()))?;
        let path = entry.path();
        if entry.file_type().is_file() && keep(path) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Builds the combined dataset from every staged page and support doc and
/// writes it to `processed/combined.txt`. Returns the text.
pub fn build_combined_dataset(layout: &DataLayout) -> Result<String, IngestError> {
    let mut combined = String::new();
    for path in list_files(&layout.html_dir(), is_markup)? {
        let content = extract_text(&path, DocKind::PageMarkup);
        combined.push_str(&format!("\n\n### HTML FILE: {}\n{}\n", file_name(&path), content));
    }
    for path in list_files(&layout.uploads_dir(), is_support)? {
        let content = extract_text(&path, DocKind::SupportDoc);
        combined.push_str(&format!("\n\n### SUPPORT DOC: {}\n{}\n", file_name(&path), content));
    }

    let out = layout.combined_text();
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IngestError::Write(parent.to_path_buf(), e))?;
    }
    std::fs::write(&out, &combined).map_err(|e| IngestError::Write(out.clone(), e))?;
    Ok(combined)
}

/// Raw markup of the page scripts are generated against: the first staged
/// `.html` file by name. `None` if no page was ever uploaded or it is unreadable.
pub fn first_markup(layout: &DataLayout) -> Option<String> {
    let path = list_files(&layout.html_dir(), is_markup).ok()?.into_iter().next()?;
    match std::fs::read(&path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read page markup");
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("not a file: {0}")]
    NotAFile(PathBuf),
    #[error("unsupported file type for {1:?}: {0}")]
    Unsupported(PathBuf, DocKind),
    #[error("failed to copy {0}: {1}")]
    Copy(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("chunking error: {0}")]
    Chunk(#[from] crate::chunks::ChunkError),
    #[error("index error: {0}")]
    Index(#[from] crate::index::IndexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Checkout</title>
  <style>body { color: red; }</style>
  <script>var secret = 1;</script>
</head>
<body>
  <!-- hidden note -->
  <h1>Checkout &amp; Pay</h1>
  <label for="email">Email</label>
  <input id="email" type="email">
  <noscript>Enable JS</noscript>
  <button id="pay">Pay&nbsp;Now</button>
</body>
</html>"#;

    #[test]
    fn html_keeps_only_visible_text() {
        assert_eq!(html_to_text(PAGE), "Checkout\nCheckout & Pay\nEmail\nPay Now");
    }

    #[test]
    fn dataset_has_headers_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("data"));
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("checkout.html"), PAGE).unwrap();
        std::fs::write(src.join("b_spec.md"), "# Discounts\nSAVE15 = 15%").unwrap();
        std::fs::write(src.join("a_notes.txt"), "Shipping is free").unwrap();
        std::fs::write(src.join("ignored.exe"), "MZ").unwrap();

        stage_file(&src.join("checkout.html"), &layout.html_dir()).unwrap();
        for f in ["b_spec.md", "a_notes.txt", "ignored.exe"] {
            stage_file(&src.join(f), &layout.uploads_dir()).unwrap();
        }

        let combined = build_combined_dataset(&layout).unwrap();
        let html_at = combined.find("### HTML FILE: checkout.html\nCheckout").unwrap();
        let notes_at = combined.find("### SUPPORT DOC: a_notes.txt\nShipping is free").unwrap();
        let spec_at = combined.find("### SUPPORT DOC: b_spec.md\n# Discounts").unwrap();
        assert!(html_at < notes_at && notes_at < spec_at);
        assert!(!combined.contains("MZ"));
        assert!(!combined.contains("secret"));
        assert_eq!(std::fs::read_to_string(layout.combined_text()).unwrap(), combined);
    }

    #[test]
    fn empty_layout_gives_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        assert_eq!(build_combined_dataset(&layout).unwrap(), "");
        assert!(first_markup(&layout).is_none());
    }

    #[test]
    fn unreadable_file_is_described_not_raised() {
        let text = extract_text(Path::new("/definitely/missing.txt"), DocKind::SupportDoc);
        assert!(text.starts_with("[extraction failed for /definitely/missing.txt"));
    }

    #[test]
    fn invalid_pdf_is_described_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let text = extract_text(&path, DocKind::SupportDoc);
        let expected = format!("[extraction failed for {}: ", path.display());
        assert!(text.starts_with(&expected), "{text}");
        assert!(text.ends_with(']'));
    }

    #[test]
    fn uploads_are_checked_by_kind() {
        assert!(check_upload(Path::new("page.HTML"), DocKind::PageMarkup).is_ok());
        assert!(check_upload(Path::new("spec.pdf"), DocKind::SupportDoc).is_ok());
        assert!(matches!(
            check_upload(Path::new("page.txt"), DocKind::PageMarkup),
            Err(IngestError::Unsupported(_, DocKind::PageMarkup))
        ));
        assert!(check_upload(Path::new("tool.exe"), DocKind::SupportDoc).is_err());
    }

    #[test]
    fn first_markup_picks_first_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        std::fs::create_dir_all(layout.html_dir()).unwrap();
        std::fs::write(layout.html_dir().join("b.html"), "<p>b</p>").unwrap();
        std::fs::write(layout.html_dir().join("a.html"), "<p>a</p>").unwrap();
        assert_eq!(first_markup(&layout).as_deref(), Some("<p>a</p>"));
    }

    #[test]
    fn staging_a_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = stage_file(dir.path(), &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, IngestError::NotAFile(_)));
    }
}
