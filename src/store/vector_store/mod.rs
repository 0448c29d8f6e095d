#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use super::snippet;
use crate::embeddings::Embedder;
use crate::{RagError, Result};

const MATRIX_FILE: &str = "embeddings.bin";
const META_FILE: &str = "meta.json";
const MATRIX_MAGIC: [u8; 4] = *b"KBRG";
const MATRIX_VERSION: u32 = 1;
const MATRIX_HEADER_LEN: usize = 24;

/// Guards against division by zero when a stored or query vector is all zeros.
const COSINE_EPSILON: f32 = 1e-12;

const ERROR_CODE_RESULTS: usize = 3;
const ERROR_CODE_SNIPPET_CHARS: usize = 500;

/// Per-chunk metadata: an ordered mapping of string keys to scalar values,
/// matched exactly by query-time filters.
pub type Metadata = BTreeMap<String, Value>;

/// One search hit with its cosine similarity score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Health-check summary of the store, not used for business logic.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub backend: String,
    pub count: usize,
    pub dimension: usize,
    pub store_dir: PathBuf,
}

/// The three parallel text/metadata/id sequences, persisted as one JSON
/// document alongside the embedding matrix.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreMeta {
    texts: Vec<String>,
    metadatas: Vec<Metadata>,
    ids: Vec<String>,
}

#[derive(Default)]
struct StoreState {
    /// Row-major matrix, `meta.ids.len()` rows of `dim` columns.
    embeddings: Vec<f32>,
    meta: StoreMeta,
    /// Fixed by the first batch ever added; `None` until then.
    dim: Option<usize>,
    connected: bool,
}

/// Durable nearest-neighbor text store.
///
/// Chunks are kept as four lock-stepped parallel sequences (texts, metadatas,
/// ids, embedding rows) and persisted to two files under the store directory
/// after every mutation. State lives behind an `RwLock`: `add_documents`
/// holds the write lock for the whole embed-append-persist sequence, so
/// concurrent adds serialize and searches never observe a partially extended
/// matrix; searches take read locks and may overlap freely.
pub struct VectorStore {
    store_dir: PathBuf,
    embedder: Box<dyn Embedder>,
    state: RwLock<StoreState>,
}

impl VectorStore {
    /// Create a disconnected store handle. `connect` runs lazily on first
    /// use, so this never touches the filesystem.
    #[inline]
    pub fn new(store_dir: impl Into<PathBuf>, embedder: Box<dyn Embedder>) -> Self {
        Self {
            store_dir: store_dir.into(),
            embedder,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Idempotent lazy initializer. Loads both persisted files when present,
    /// otherwise starts empty with the dimension undetermined. Safe to call
    /// any number of times; the connected flag only ever goes forward.
    #[inline]
    pub fn connect(&self) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| RagError::Store("store lock poisoned".to_string()))?;

        if state.connected {
            return Ok(());
        }

        let matrix_path = self.store_dir.join(MATRIX_FILE);
        let meta_path = self.store_dir.join(META_FILE);

        if matrix_path.exists() && meta_path.exists() {
            let (embeddings, rows, dim) = load_matrix(&matrix_path)?;
            let meta = load_meta(&meta_path)?;

            if meta.texts.len() != rows || meta.metadatas.len() != rows || meta.ids.len() != rows {
                return Err(RagError::Store(format!(
                    "persisted metadata out of step with matrix: {} texts, {} metadatas, {} ids, {} rows",
                    meta.texts.len(),
                    meta.metadatas.len(),
                    meta.ids.len(),
                    rows
                )));
            }

            state.embeddings = embeddings;
            state.meta = meta;
            state.dim = (rows > 0).then_some(dim);
            info!(
                "Loaded vector store from {} ({} chunks, dim {:?})",
                self.store_dir.display(),
                rows,
                state.dim
            );
        } else {
            debug!(
                "No persisted store at {}, starting empty",
                self.store_dir.display()
            );
        }

        state.connected = true;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.read_state()?.connected {
            return Ok(());
        }
        self.connect()
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| RagError::Store("store lock poisoned".to_string()))
    }

    /// Append a batch of chunks and persist the whole store before returning.
    ///
    /// The three sequences must have equal length; a mismatch is rejected
    /// before any mutation. The whole batch is embedded in one backend call,
    /// so an embedding failure leaves the store untouched. Duplicate ids are
    /// not reconciled: adding the same id twice creates two rows.
    #[inline]
    pub fn add_documents(
        &self,
        documents: &[String],
        metadatas: &[Metadata],
        ids: &[String],
    ) -> Result<()> {
        self.ensure_connected()?;

        if documents.len() != metadatas.len() || documents.len() != ids.len() {
            return Err(RagError::Validation(format!(
                "documents, metadatas, ids must have the same length (got {}, {}, {})",
                documents.len(),
                metadatas.len(),
                ids.len()
            )));
        }

        if documents.is_empty() {
            debug!("No documents to add");
            return Ok(());
        }

        let vectors = self.embedder.embed_batch(documents)?;
        if vectors.len() != documents.len() {
            return Err(RagError::Store(format!(
                "embedding backend returned {} vectors for {} documents",
                vectors.len(),
                documents.len()
            )));
        }
        let width = vectors[0].len();
        if width == 0 {
            return Err(RagError::Store(
                "embedding backend produced zero-width vectors".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != width) {
            return Err(RagError::Store(format!(
                "embedding backend produced mixed widths within one batch ({} vs {})",
                width,
                bad.len()
            )));
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| RagError::Store("store lock poisoned".to_string()))?;

        match state.dim {
            None => state.dim = Some(width),
            Some(dim) if dim != width => {
                return Err(RagError::Store(format!(
                    "embedding width {} does not match store dimension {}; \
                     the backend must not change mid-lifetime",
                    width, dim
                )));
            }
            Some(_) => {}
        }

        let prior_rows = state.meta.ids.len();
        let prior_floats = state.embeddings.len();

        for vector in &vectors {
            state.embeddings.extend_from_slice(vector);
        }
        state.meta.texts.extend_from_slice(documents);
        state.meta.metadatas.extend_from_slice(metadatas);
        state.meta.ids.extend_from_slice(ids);

        if let Err(e) = persist(&state, &self.store_dir) {
            // Roll the in-memory append back so the parallel-array invariant
            // and the on-disk snapshot stay in agreement.
            warn!("Persist failed, rolling back batch of {}: {}", documents.len(), e);
            state.embeddings.truncate(prior_floats);
            state.meta.texts.truncate(prior_rows);
            state.meta.metadatas.truncate(prior_rows);
            state.meta.ids.truncate(prior_rows);
            if prior_rows == 0 {
                state.dim = None;
            }
            return Err(e);
        }

        info!("Added {} chunks (store now {})", documents.len(), state.meta.ids.len());
        Ok(())
    }

    /// Rank stored chunks against the query by cosine similarity.
    ///
    /// An exact-match metadata filter, when supplied, narrows the candidate
    /// set before ranking: filtered-out chunks never compete for the top-k
    /// slots. An empty store or a filter matching nothing yields an empty
    /// result, not an error.
    #[inline]
    pub fn search(
        &self,
        query: &str,
        n_results: usize,
        filter_metadata: Option<&Metadata>,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_connected()?;

        // Emptiness is decided before the query is embedded: an empty store
        // yields an empty result even when the embedding backend is down.
        {
            let state = self.read_state()?;
            if state.meta.ids.is_empty() || n_results == 0 {
                return Ok(Vec::new());
            }
        }

        let query_vector = self.embedder.embed(query)?;

        let state = self.read_state()?;
        let count = state.meta.ids.len();

        let dim = state.dim.ok_or_else(|| {
            RagError::Store("store has rows but no dimension".to_string())
        })?;
        if query_vector.len() != dim {
            return Err(RagError::Store(format!(
                "query embedding width {} does not match store dimension {}",
                query_vector.len(),
                dim
            )));
        }

        let mut scored: Vec<(usize, f32)> = Vec::new();
        for row in 0..count {
            if let Some(filter) = filter_metadata {
                if !matches_filter(&state.meta.metadatas[row], filter) {
                    continue;
                }
            }
            let offset = row * dim;
            let stored = &state.embeddings[offset..offset + dim];
            scored.push((row, cosine_similarity(&query_vector, stored)));
        }

        if scored.is_empty() {
            return Ok(Vec::new());
        }

        // Descending by score; ties resolve to the lower row index so the
        // ordering is deterministic.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(n_results);

        let hits = scored
            .into_iter()
            .map(|(row, score)| SearchHit {
                id: state.meta.ids[row].clone(),
                text: state.meta.texts[row].clone(),
                metadata: state.meta.metadatas[row].clone(),
                score,
            })
            .collect();

        Ok(hits)
    }

    /// Convenience wrapper biasing the query toward cause/fix phrasing and
    /// rendering the top hits as a short attributed report.
    #[inline]
    pub fn search_by_error_code(&self, error_code: &str) -> Result<String> {
        let query = format!("appliance error code {error_code} meaning cause fix steps");
        let hits = self.search(&query, ERROR_CODE_RESULTS, None)?;

        if hits.is_empty() {
            return Ok("No information found for this error code.".to_string());
        }

        let mut parts = vec!["Error code information:\n".to_string()];
        for hit in &hits {
            let source = metadata_display(&hit.metadata, "source");
            let page = metadata_display(&hit.metadata, "page");
            parts.push(format!(
                "- From {} (Page {}):\n{}",
                source,
                page,
                snippet(&hit.text, ERROR_CODE_SNIPPET_CHARS)
            ));
        }

        Ok(parts.join("\n\n"))
    }

    /// Backend name, chunk count, vector dimension and storage location.
    #[inline]
    pub fn get_collection_stats(&self) -> Result<CollectionStats> {
        self.ensure_connected()?;
        let state = self.read_state()?;
        Ok(CollectionStats {
            backend: self.embedder.name().to_string(),
            count: state.meta.ids.len(),
            dimension: state.dim.unwrap_or(0),
            store_dir: self.store_dir.clone(),
        })
    }
}

fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt() + COSINE_EPSILON)
}

fn metadata_display(metadata: &Metadata, key: &str) -> String {
    match metadata.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "Unknown".to_string(),
    }
}

fn persist(state: &StoreState, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;

    let rows = state.meta.ids.len();
    let dim = state.dim.unwrap_or(0);

    let mut buf = Vec::with_capacity(MATRIX_HEADER_LEN + state.embeddings.len() * 4);
    buf.extend_from_slice(&MATRIX_MAGIC);
    buf.extend_from_slice(&MATRIX_VERSION.to_le_bytes());
    buf.extend_from_slice(&(rows as u64).to_le_bytes());
    buf.extend_from_slice(&(dim as u64).to_le_bytes());
    for value in &state.embeddings {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    fs::write(dir.join(MATRIX_FILE), buf)?;

    let json = serde_json::to_vec(&state.meta)
        .map_err(|e| RagError::Store(format!("failed to serialize metadata: {e}")))?;
    fs::write(dir.join(META_FILE), json)?;

    debug!("Persisted {} chunks to {}", rows, dir.display());
    Ok(())
}

fn load_matrix(path: &Path) -> Result<(Vec<f32>, usize, usize)> {
    let bytes = fs::read(path)?;
    if bytes.len() < MATRIX_HEADER_LEN {
        return Err(RagError::Store(format!(
            "matrix file {} is truncated",
            path.display()
        )));
    }

    if bytes[..4] != MATRIX_MAGIC {
        return Err(RagError::Store(format!(
            "matrix file {} has an unrecognized header",
            path.display()
        )));
    }

    let version = u32::from_le_bytes(read_array(&bytes, 4)?);
    if version != MATRIX_VERSION {
        return Err(RagError::Store(format!(
            "matrix file version {version} is not supported"
        )));
    }

    let rows = u64::from_le_bytes(read_array(&bytes, 8)?) as usize;
    let dim = u64::from_le_bytes(read_array(&bytes, 16)?) as usize;

    let expected = MATRIX_HEADER_LEN + rows * dim * 4;
    if bytes.len() != expected {
        return Err(RagError::Store(format!(
            "matrix file {} has {} bytes, expected {}",
            path.display(),
            bytes.len(),
            expected
        )));
    }

    let embeddings = bytes[MATRIX_HEADER_LEN..]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok((embeddings, rows, dim))
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| RagError::Store("matrix file is truncated".to_string()))
}

fn load_meta(path: &Path) -> Result<StoreMeta> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| RagError::Store(format!("failed to parse {}: {e}", path.display())))
}
