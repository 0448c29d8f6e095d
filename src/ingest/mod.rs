
use fancy_regex::Regex;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::store::{Metadata, VectorStore};
use crate::{RagError, Result};

/// Boilerplate strings that show up in text extracted from scanned manuals.
const JUNK_PHRASES: &[&str] = &[
    "Downloaded from www.Manualslib.com manuals search engine",
    "Downloaded from",
    "www.Manualslib.com",
    "manuals search engine",
];

/// Page separator in pre-extracted text files.
const PAGE_BREAK: char = '\u{0C}';

const INGESTED_EXTENSIONS: &[&str] = &["txt", "md"];

/// Chunking parameters, all in characters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Chunks at or below this length are dropped as noise.
    pub min_chunk_chars: usize,
    /// Pages at or below this length are skipped entirely.
    pub min_page_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 300,
            min_chunk_chars: 100,
            min_page_chars: 50,
        }
    }
}

impl ChunkingConfig {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Validation("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// One chunk ready for insertion into the vector store.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: Metadata,
    pub id: String,
}

/// Counts reported back after an ingestion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
}

/// Splits pre-extracted manual text into overlapping chunks and loads them
/// into the vector store with source/page attribution.
pub struct DocumentIngester {
    config: ChunkingConfig,
    blank_runs_re: Regex,
    spaces_re: Regex,
}

impl DocumentIngester {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        let blank_runs_re = Regex::new(r"\n\s*\n\s*\n")
            .map_err(|e| RagError::Config(format!("invalid whitespace pattern: {e}")))?;
        let spaces_re = Regex::new(r" +")
            .map_err(|e| RagError::Config(format!("invalid whitespace pattern: {e}")))?;
        Ok(Self {
            config,
            blank_runs_re,
            spaces_re,
        })
    }

    /// Strip extraction boilerplate and collapse whitespace runs. Newline
    /// runs are capped at one blank line so paragraph breaks survive.
    fn clean_text(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for phrase in JUNK_PHRASES {
            cleaned = cleaned.replace(phrase, "");
        }
        let cleaned = self.blank_runs_re.replace_all(&cleaned, "\n\n");
        let cleaned = self.spaces_re.replace_all(&cleaned, " ");
        cleaned.trim().to_string()
    }

    /// Split text into overlapping windows, preferring to end a window at a
    /// sentence or paragraph boundary once the window is more than 60% full.
    /// Offsets are in characters throughout so multibyte text chunks safely.
    fn chunk_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let mut end = start + self.config.chunk_size;
            let window = &chars[start..end.min(total)];
            let mut window_len = window.len();

            if end < total {
                let last_period = rfind_pair(window, '.', ' ');
                let last_break = rfind_pair(window, '\n', '\n');
                let break_point = match (last_period, last_break) {
                    (Some(p), Some(b)) => Some(p.max(b)),
                    (Some(p), None) => Some(p),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                };

                if let Some(break_point) = break_point {
                    if break_point * 10 > self.config.chunk_size * 6 {
                        window_len = break_point + 1;
                        end = start + window_len;
                    }
                }
            }

            let chunk: String = chars[start..(start + window_len).min(total)].iter().collect();
            let trimmed = chunk.trim();
            if trimmed.chars().count() > self.config.min_chunk_chars {
                chunks.push(trimmed.to_string());
            }

            if end <= start + self.config.chunk_overlap {
                break;
            }
            start = end - self.config.chunk_overlap;
        }

        chunks
    }

    /// Chunk one document's text into store-ready records. Pages are
    /// delimited by form feeds; a file without them is a single page.
    pub fn process_document(&self, source_name: &str, raw_text: &str) -> Vec<DocumentChunk> {
        let document_type = infer_doc_type(source_name);
        let mut records = Vec::new();

        for (page_index, page_text) in raw_text.split(PAGE_BREAK).enumerate() {
            let page_num = page_index + 1;
            let cleaned = self.clean_text(page_text);
            if cleaned.chars().count() <= self.config.min_page_chars {
                continue;
            }

            for (chunk_index, chunk) in self.chunk_text(&cleaned).into_iter().enumerate() {
                let id = format!(
                    "{:x}",
                    md5::compute(format!("{source_name}-{page_num}-{chunk_index}"))
                );
                let metadata: Metadata = [
                    ("source".to_string(), json!(source_name)),
                    ("page".to_string(), json!(page_num)),
                    ("chunk_index".to_string(), json!(chunk_index)),
                    ("document_type".to_string(), json!(document_type)),
                ]
                .into_iter()
                .collect();
                records.push(DocumentChunk {
                    text: chunk,
                    metadata,
                    id,
                });
            }
        }

        info!("Created {} chunks from {}", records.len(), source_name);
        records
    }

    /// Ingest every `.txt`/`.md` file in a directory as one batch.
    pub fn ingest_directory(&self, store: &VectorStore, directory: &Path) -> Result<IngestReport> {
        let mut paths: Vec<_> = fs::read_dir(directory)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| INGESTED_EXTENSIONS.contains(&ext))
            })
            .collect();
        // Deterministic ingestion order regardless of directory iteration.
        paths.sort();

        if paths.is_empty() {
            warn!("No ingestable files found in {}", directory.display());
            return Ok(IngestReport::default());
        }

        let mut documents = Vec::new();
        let mut metadatas = Vec::new();
        let mut ids = Vec::new();
        let mut files = 0;

        for path in &paths {
            let source_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    RagError::Validation(format!("unusable file name: {}", path.display()))
                })?;
            info!("Processing: {}", source_name);
            let raw_text = fs::read_to_string(path)?;

            for record in self.process_document(source_name, &raw_text) {
                documents.push(record.text);
                metadatas.push(record.metadata);
                ids.push(record.id);
            }
            files += 1;
        }

        if documents.is_empty() {
            warn!("No documents to ingest");
            return Ok(IngestReport { files, chunks: 0 });
        }

        let chunks = documents.len();
        store.add_documents(&documents, &metadatas, &ids)?;
        info!("Ingested {} chunks from {} files", chunks, files);
        Ok(IngestReport { files, chunks })
    }
}

/// Classify a document by its filename so retrieval can filter on type.
fn infer_doc_type(filename: &str) -> &'static str {
    let lowered = filename.to_lowercase();
    if lowered.contains("washing") || lowered.contains("machine") {
        "washing_machine_manual"
    } else if lowered.contains("tv") || lowered.contains("television") || lowered.contains("lcd") {
        "tv_manual"
    } else if lowered.contains("sop") || lowered.contains("procedure") {
        "sop"
    } else {
        "manual"
    }
}

/// Last position where `a` is immediately followed by `b`, in char offsets.
fn rfind_pair(chars: &[char], a: char, b: char) -> Option<usize> {
    (0..chars.len().saturating_sub(1))
        .rev()
        .find(|&i| chars[i] == a && chars[i + 1] == b)
}
