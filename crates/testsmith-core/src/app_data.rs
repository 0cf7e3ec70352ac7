//! Where Testsmith keeps its own state when no data directory is configured.
//!
//! Uploaded pages, support docs, the combined dataset and the vector index all
//! live under one data directory. Config always lives here.

use std::path::{Path, PathBuf};

/// Returns the directory where Testsmith stores config and, by default, its data.
/// On Linux: `~/.local/share/testsmith/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Testsmith", "Testsmith")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Fixed layout inside a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Uploaded page markup (`.html`).
    pub fn html_dir(&self) -> PathBuf {
        self.root.join("html")
    }

    /// Uploaded support documents.
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Combined plain-text dataset written on every ingest.
    pub fn combined_text(&self) -> PathBuf {
        self.root.join("processed").join("combined.txt")
    }

    pub fn index_file(&self) -> PathBuf {
        self.root.join("vector_store.index")
    }

    pub fn chunks_file(&self) -> PathBuf {
        self.root.join("chunks.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_is_some() {
        assert!(app_data_dir().is_some());
    }

    #[test]
    fn layout_keeps_index_and_chunks_side_by_side() {
        let layout = DataLayout::new("/tmp/ts");
        assert_eq!(layout.index_file().parent(), layout.chunks_file().parent());
        assert_eq!(layout.html_dir(), PathBuf::from("/tmp/ts/html"));
    }
}
