//! Flat L2 vector index and its on-disk form.
//!
//! The index owns vectors only; chunk text is kept in a parallel list with the
//! same ordinals. Both are persisted side by side and replaced together.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Literal line that terminates every record in the chunk file.
pub const CHUNK_SEPARATOR: &str = "-----CHUNK_SEPARATOR-----";

/// Exhaustive nearest-neighbor index under squared Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatL2Index {
    /// Embedding model that produced the vectors.
    pub model: String,
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatL2Index {
    pub fn new(model: impl Into<String>, dim: usize) -> Self {
        Self {
            model: model.into(),
            dim,
            vectors: Vec::new(),
        }
    }

    /// Builds an index whose dimension is taken from the first vector.
    pub fn from_vectors(
        model: impl Into<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, StoreError> {
        let dim = vectors.first().map(Vec::len).unwrap_or(0);
        let mut index = Self::new(model, dim);
        for v in vectors {
            index.add(v)?;
        }
        Ok(index)
    }

    pub fn add(&mut self, vector: Vec<f32>) -> Result<(), StoreError> {
        if vector.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                got: vector.len(),
                want: self.dim,
            });
        }
        self.vectors.push(vector);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Returns up to `k` `(ordinal, distance)` pairs, nearest first.
    /// Ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, StoreError> {
        if query.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                got: query.len(),
                want: self.dim,
            });
        }
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k.min(self.vectors.len()));
        Ok(scored)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// On-disk form of the index: the vectors plus the SHA-256 digest of the chunk
/// file they were saved with.
#[derive(Serialize)]
struct StoredIndexRef<'a> {
    chunks_sha256: String,
    #[serde(flatten)]
    index: &'a FlatL2Index,
}

#[derive(Deserialize)]
struct StoredIndex {
    chunks_sha256: String,
    #[serde(flatten)]
    index: FlatL2Index,
}

/// Writes the index artifact and chunk file, replacing any prior pair.
///
/// Both files are first written to temporary siblings and only then renamed
/// into place, chunks before index. The index records the digest of its chunk
/// file, so a pair left half-replaced fails to load instead of mixing builds.
pub fn save(
    index: &FlatL2Index,
    chunks: &[String],
    index_path: &Path,
    chunks_path: &Path,
) -> Result<(), StoreError> {
    if index.len() != chunks.len() {
        return Err(StoreError::Misaligned {
            vectors: index.len(),
            chunks: chunks.len(),
        });
    }
    let index_tmp = tmp_sibling(index_path);
    let chunks_tmp = tmp_sibling(chunks_path);

    let result = write_pair(index, chunks, &index_tmp, &chunks_tmp)
        .and_then(|()| fs::rename(&chunks_tmp, chunks_path).map_err(StoreError::from))
        .and_then(|()| fs::rename(&index_tmp, index_path).map_err(StoreError::from));
    if result.is_err() {
        let _ = fs::remove_file(&index_tmp);
        let _ = fs::remove_file(&chunks_tmp);
    }
    result
}

/// Reads the persisted pair. `None` when nothing was ever built or the pair is
/// unreadable or misaligned.
pub fn load(index_path: &Path, chunks_path: &Path) -> Option<(FlatL2Index, Vec<String>)> {
    if !index_path.exists() {
        return None;
    }
    let stored: StoredIndex = match fs::read(index_path)
        .map_err(StoreError::from)
        .and_then(|b| serde_json::from_slice(&b).map_err(StoreError::from))
    {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(path = %index_path.display(), error = %e, "index unreadable, treating as absent");
            return None;
        }
    };
    let raw = match fs::read_to_string(chunks_path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %chunks_path.display(), error = %e, "chunk file unreadable, treating as absent");
            return None;
        }
    };
    if digest(&raw) != stored.chunks_sha256 {
        tracing::warn!(
            path = %chunks_path.display(),
            "chunk file does not belong to this index, treating as absent"
        );
        return None;
    }
    let index = stored.index;
    let chunks = decode_chunks(&raw);
    if chunks.len() != index.len() {
        tracing::warn!(
            vectors = index.len(),
            chunks = chunks.len(),
            "index and chunk file disagree, treating as absent"
        );
        return None;
    }
    Some((index, chunks))
}

fn write_pair(
    index: &FlatL2Index,
    chunks: &[String],
    index_tmp: &Path,
    chunks_tmp: &Path,
) -> Result<(), StoreError> {
    let encoded = encode_chunks(chunks);
    let bytes = serde_json::to_vec(&StoredIndexRef {
        chunks_sha256: digest(&encoded),
        index,
    })?;
    write_synced(index_tmp, &bytes)?;
    write_synced(chunks_tmp, encoded.as_bytes())?;
    Ok(())
}

/// Lowercase hex SHA-256 of the encoded chunk file.
fn digest(encoded_chunks: &str) -> String {
    let mut h = Sha256::new();
    h.update(encoded_chunks.as_bytes());
    format!("{:x}", h.finalize())
}

fn encode_chunks(chunks: &[String]) -> String {
    let mut out = String::new();
    for c in chunks {
        out.push_str(c);
        out.push('\n');
        out.push_str(CHUNK_SEPARATOR);
        out.push('\n');
    }
    out
}

fn decode_chunks(raw: &str) -> Vec<String> {
    let terminator = format!("\n{CHUNK_SEPARATOR}\n");
    let mut chunks: Vec<String> = raw.split(terminator.as_str()).map(str::to_string).collect();
    // Every record is terminated, so the split leaves one empty tail.
    if chunks.last().is_some_and(|s| s.is_empty()) {
        chunks.pop();
    }
    chunks
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::File::create(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector size mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },
    #[error("index has {vectors} vectors but {chunks} chunks")]
    Misaligned { vectors: usize, chunks: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
