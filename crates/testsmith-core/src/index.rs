//! Index pipeline: chunks → embed → flat L2 index → disk, and retrieval back out.
//!
//! The knowledge base is rebuilt wholesale on every ingest and reloaded from
//! disk on every query. Builds and searches are not coordinated with each
//! other; callers that overlap them must serialize access themselves.

use serde::Serialize;

use crate::app_data::DataLayout;
use crate::ollama::{Embedder, ModelError};
use crate::store::{self, FlatL2Index, StoreError};

/// A loaded index together with its chunk text, aligned by ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    index: FlatL2Index,
    chunks: Vec<String>,
}

impl KnowledgeBase {
    pub fn index(&self) -> &FlatL2Index {
        &self.index
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Nearest chunks to an already-embedded query.
    pub fn nearest(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, StoreError> {
        Ok(self
            .index
            .search(query, top_k)?
            .into_iter()
            .map(|(i, distance)| RetrievedChunk {
                text: self.chunks[i].clone(),
                distance,
            })
            .collect())
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    /// Squared L2 distance to the query; smaller is closer.
    pub distance: f32,
}

/// Result of a search. `NotReady` means nothing was ever built, which is
/// different from a built index that yields no hits.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    NotReady,
    Hits(Vec<RetrievedChunk>),
}

/// Embeds `chunks`, builds the flat index and persists both, replacing what
/// was on disk. Returns the knowledge base that was written.
pub async fn build_index(
    chunks: Vec<String>,
    embedder: &dyn Embedder,
    layout: &DataLayout,
) -> Result<KnowledgeBase, IndexError> {
    let vectors = embedder.embed_batch(&chunks).await?;
    if vectors.len() != chunks.len() {
        return Err(IndexError::Embed(ModelError::CountMismatch {
            got: vectors.len(),
            want: chunks.len(),
        }));
    }
    let index = FlatL2Index::from_vectors(embedder.model_name(), vectors)?;
    store::save(&index, &chunks, &layout.index_file(), &layout.chunks_file())?;
    tracing::info!(
        chunks = chunks.len(),
        dim = index.dim(),
        model = %index.model,
        "index built"
    );
    Ok(KnowledgeBase { index, chunks })
}

/// Loads the persisted knowledge base. `None` if it was never built or is unreadable.
pub fn load_index(layout: &DataLayout) -> Option<KnowledgeBase> {
    let (index, chunks) = store::load(&layout.index_file(), &layout.chunks_file())?;
    Some(KnowledgeBase { index, chunks })
}

/// Embeds `query` and returns up to `top_k` nearest chunks, nearest first.
pub async fn search(
    layout: &DataLayout,
    embedder: &dyn Embedder,
    query: &str,
    top_k: usize,
) -> Result<Retrieval, IndexError> {
    let Some(kb) = load_index(layout) else {
        return Ok(Retrieval::NotReady);
    };
    if kb.is_empty() {
        return Ok(Retrieval::Hits(Vec::new()));
    }
    if kb.index.model != embedder.model_name() {
        tracing::warn!(
            built_with = %kb.index.model,
            querying_with = embedder.model_name(),
            "embedding model differs from the one the index was built with"
        );
    }
    let query_vec = embedder.embed(query).await?;
    let hits = kb.nearest(&query_vec, top_k)?;
    tracing::debug!(hits = hits.len(), top_k, "retrieved context");
    Ok(Retrieval::Hits(hits))
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("embedding error: {0}")]
    Embed(#[from] ModelError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Deterministic bag-of-words embedder: each word bumps one of 16 buckets.
    pub(crate) struct HashEmbedder {
        pub calls: AtomicUsize,
    }

    impl HashEmbedder {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    pub(crate) fn embed_words(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 16];
        for word in text.split_whitespace() {
            let w = word.to_lowercase();
            let bucket = w.bytes().fold(7u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
            v[(bucket % 16) as usize] += 1.0;
        }
        v
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn model_name(&self) -> &str {
            "hash-16"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| embed_words(t)).collect())
        }
    }

    fn chunks() -> Vec<String> {
        vec![
            "checkout form requires email".to_string(),
            "discount code SAVE15 gives fifteen percent".to_string(),
            "express shipping costs ten dollars".to_string(),
        ]
    }

    #[tokio::test]
    async fn search_before_build_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let embedder = HashEmbedder::new();
        let r = search(&layout, &embedder, "discount", 3).await.unwrap();
        assert_eq!(r, Retrieval::NotReady);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn load_after_build_round_trips_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let built = build_index(chunks(), &HashEmbedder::new(), &layout).await.unwrap();
        assert_eq!(built.len(), 3);
        let loaded = load_index(&layout).unwrap();
        assert_eq!(loaded.chunks(), chunks().as_slice());
        assert_eq!(loaded, built);
    }

    #[tokio::test]
    async fn search_is_sorted_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let embedder = HashEmbedder::new();
        build_index(chunks(), &embedder, &layout).await.unwrap();
        let Retrieval::Hits(hits) = search(&layout, &embedder, "discount code SAVE15", 10)
            .await
            .unwrap()
        else {
            panic!("index should be ready");
        };
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(hits[0].text.contains("SAVE15"));
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let embedder = HashEmbedder::new();
        build_index(chunks(), &embedder, &layout).await.unwrap();
        build_index(vec!["only one".to_string()], &embedder, &layout)
            .await
            .unwrap();
        assert_eq!(load_index(&layout).unwrap().chunks(), ["only one".to_string()]);
    }

    #[tokio::test]
    async fn identical_builds_give_identical_results() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let embedder = HashEmbedder::new();
        build_index(chunks(), &embedder, &layout).await.unwrap();
        let first = search(&layout, &embedder, "shipping email", 3).await.unwrap();
        build_index(chunks(), &embedder, &layout).await.unwrap();
        let second = search(&layout, &embedder, "shipping email", 3).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_build_is_ready_but_has_no_hits() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let embedder = HashEmbedder::new();
        build_index(Vec::new(), &embedder, &layout).await.unwrap();
        let r = search(&layout, &embedder, "anything", 5).await.unwrap();
        assert_eq!(r, Retrieval::Hits(Vec::new()));
    }

    #[tokio::test]
    async fn unwritable_location_fails_build() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // A regular file where the data directory should be.
        let layout = DataLayout::new(blocker.join("data"));
        let err = build_index(chunks(), &HashEmbedder::new(), &layout)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Store(StoreError::Io(_))));
    }
}
