// Store module
// File-backed vector store with cosine-similarity search

pub mod vector_store;

pub use vector_store::{CollectionStats, Metadata, SearchHit, VectorStore};

/// Truncate to a character budget, appending an ellipsis when text was cut.
/// Operates on characters, not bytes, so multibyte content stays intact.
pub(crate) fn snippet(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(limit).collect();
        cut.push_str("...");
        cut
    }
}
