
use fancy_regex::Regex;
use tracing::debug;

use super::Embedder;
use crate::{RagError, Result};

/// Default vector width for the hashing backend.
pub const DEFAULT_DIMENSION: usize = 1024;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic offline embedder.
///
/// Lowercases the text, extracts alphanumeric token runs, hashes each token
/// into a fixed-width accumulator with FNV-1a, counts term occurrences and
/// L2-normalizes the result. The same text and dimension always produce a
/// bit-identical vector, which makes this backend suitable as the default
/// and for tests; it needs no network or model files.
#[derive(Debug)]
pub struct HashingEmbedder {
    dimension: usize,
    token_re: Regex,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Config(
                "embedding dimension must be nonzero".to_string(),
            ));
        }

        let token_re = Regex::new(r"[a-z0-9]+")
            .map_err(|e| RagError::Config(format!("invalid token pattern: {e}")))?;

        debug!("Created hashing embedder with dimension {}", dimension);
        Ok(Self { dimension, token_re })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a over the token bytes. Stable across processes and Rust versions,
/// unlike the std hasher.
fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn name(&self) -> &'static str {
        "local-hash"
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for token in self.token_re.find_iter(&lowered) {
            let token = token
                .map_err(|e| RagError::Retrieval(format!("tokenization failed: {e}")))?;
            let slot = ((fnv1a(token.as_str()) & 0x7fff_ffff) as usize) % self.dimension;
            vector[slot] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        Ok(vector)
    }
}
