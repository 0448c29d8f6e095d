// Embeddings module
// Pluggable text-embedding backends behind one trait

pub mod hashing;
pub mod remote;

pub use hashing::HashingEmbedder;
pub use remote::RemoteEmbedder;

use crate::Result;
use crate::config::{Config, EmbeddingBackend};

/// Strategy producing fixed-width vectors from text.
///
/// A store must keep the same backend for its whole lifetime: the vector
/// width is fixed by the first batch ever added, and a different backend
/// would produce vectors of a different width.
pub trait Embedder: Send + Sync {
    /// Short backend name, surfaced in collection stats.
    fn name(&self) -> &'static str;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. The default embeds one text at a time.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Build the embedder selected by the configuration. Selection happens once
/// here; the store never branches on the backend at call time.
#[inline]
pub fn from_config(config: &Config) -> Result<Box<dyn Embedder>> {
    match config.embedding.backend {
        EmbeddingBackend::Local => Ok(Box::new(HashingEmbedder::new(
            config.embedding.dimension as usize,
        )?)),
        EmbeddingBackend::Remote => {
            Ok(Box::new(RemoteEmbedder::new(&config.embedding.remote)?))
        }
    }
}
