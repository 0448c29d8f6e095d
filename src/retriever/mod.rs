
use fancy_regex::Regex;
use itertools::Itertools;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::MatchStrategy;
use crate::store::{Metadata, SearchHit, VectorStore, snippet};
use crate::{RagError, Result};

const STOP_WORDS: &[&str] = &["my", "the", "is", "are", "was", "were", "a", "an"];

const KEY_TERMS: &[&str] = &[
    "error",
    "code",
    "cause",
    "solution",
    "fix",
    "check",
    "replace",
    "problem",
    "issue",
    "step",
    "procedure",
    "warning",
    "note",
];

const PART_LINE_TERMS: &[&str] = &["price", "cost", "part", "₹", "rs"];

const SYNOPSIS_SENTENCES: usize = 5;
const MIN_SENTENCE_CHARS: usize = 20;
const SYNOPSIS_FALLBACK_CHARS: usize = 600;

/// Dedup key length. Two near-duplicate passages whose synopses differ in
/// their first 100 characters will both surface; that false-negative risk is
/// the accepted cost of cheap dedup.
const DEDUP_PREFIX_CHARS: usize = 100;

const MAX_REPORT_RESULTS: usize = 3;
const SEPARATOR: &str =
    "======================================================================";
const DIVIDER: &str =
    "----------------------------------------------------------------------";

/// Query intent used to bias the rewritten query toward corpus vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    ErrorCode,
    Symptom,
    SpareParts,
    Sop,
    General,
}

/// Outcome of a retrieval entry point.
///
/// Internal callers keep the found/not-found distinction; the literal
/// fallback text the conversational layer speaks is only rendered by
/// `into_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    Found(String),
    NotFound { message: String },
}

impl RetrievalOutcome {
    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Render the final text the calling layer relays to the speech model.
    #[inline]
    pub fn into_text(self) -> String {
        match self {
            Self::Found(report) => report,
            Self::NotFound { message } => message,
        }
    }
}

/// Ordered mapping from lowercase catalog keywords to source-document names.
/// Order matters under `MatchStrategy::FirstMatch`.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    entries: Vec<(String, Vec<String>)>,
}

impl SourceCatalog {
    #[inline]
    pub fn new(entries: Vec<(String, Vec<String>)>) -> Self {
        Self { entries }
    }

    /// The appliance manual catalog the service corpus ships with.
    #[inline]
    pub fn appliance_manuals() -> Self {
        let sources = |names: &[&str]| names.iter().map(|s| (*s).to_string()).collect();
        Self::new(vec![
            // The washing machine source keeps the typo in the corpus filename.
            ("washing machine".to_string(), sources(&["washing_maching.pdf"])),
            ("washer".to_string(), sources(&["washing_maching.pdf"])),
            (
                "tv".to_string(),
                sources(&["lcd_colour_television.pdf", "zenith_z47lcd4f.pdf"]),
            ),
            (
                "television".to_string(),
                sources(&["lcd_colour_television.pdf", "zenith_z47lcd4f.pdf"]),
            ),
            (
                "lcd".to_string(),
                sources(&["lcd_colour_television.pdf", "zenith_z47lcd4f.pdf"]),
            ),
            ("air conditioner".to_string(), sources(&["c5e0f2.pdf"])),
            ("ac".to_string(), sources(&["c5e0f2.pdf"])),
            ("aircon".to_string(), sources(&["c5e0f2.pdf"])),
        ])
    }

    fn detect(&self, query: &str, strategy: MatchStrategy) -> Vec<String> {
        let query_lower = query.to_lowercase();

        let matched = match strategy {
            MatchStrategy::FirstMatch => self
                .entries
                .iter()
                .find(|(keyword, _)| query_lower.contains(keyword.as_str())),
            MatchStrategy::LongestKeyword => self
                .entries
                .iter()
                .filter(|(keyword, _)| query_lower.contains(keyword.as_str()))
                .max_by_key(|(keyword, _)| keyword.len()),
        };

        match matched {
            Some((keyword, sources)) => {
                info!("Detected category '{}' -> filtering for {:?}", keyword, sources);
                sources.clone()
            }
            None => Vec::new(),
        }
    }
}

/// Query-shaping and result-formatting layer over the vector store.
///
/// Detects a target source subset from free text, rewrites the query with
/// domain keywords, fans out filtered searches, compresses passages to their
/// key sentences, deduplicates and renders a compact attributed report.
pub struct KnowledgeRetriever {
    store: Arc<VectorStore>,
    catalog: SourceCatalog,
    strategy: MatchStrategy,
    sentence_re: Regex,
}

impl KnowledgeRetriever {
    #[inline]
    pub fn new(
        store: Arc<VectorStore>,
        catalog: SourceCatalog,
        strategy: MatchStrategy,
    ) -> Result<Self> {
        let sentence_re = Regex::new(r"[.!?]\s+")
            .map_err(|e| RagError::Config(format!("invalid sentence pattern: {e}")))?;
        Ok(Self {
            store,
            catalog,
            strategy,
            sentence_re,
        })
    }

    /// Lowercase, strip filler words, then prepend the keyword template for
    /// the query kind. A deterministic string transform, not a model call;
    /// it biases the embedding toward vocabulary the corpus uses.
    fn rewrite_query(&self, query: &str, kind: QueryKind) -> String {
        let lowered = query.to_lowercase();
        let filtered = lowered
            .split_whitespace()
            .filter(|word| !STOP_WORDS.contains(word))
            .join(" ");

        match kind {
            QueryKind::ErrorCode => {
                format!("error code {filtered} fault diagnosis solution fix repair steps troubleshoot")
            }
            QueryKind::Symptom => {
                format!("problem symptom {filtered} cause reason solution fix troubleshoot repair check")
            }
            QueryKind::SpareParts => {
                format!("spare part component {filtered} part number price cost replacement")
            }
            QueryKind::Sop => {
                format!("policy procedure guideline rule {filtered} standard operating")
            }
            QueryKind::General => filtered,
        }
    }

    /// Compress a passage to its most useful sentences: split on terminal
    /// punctuation, drop very short sentences, score the rest by how many
    /// domain terms they mention and keep the top few in original order of
    /// score rank. Lossy and keyword-driven, not a learned summary.
    fn extract_key_info(&self, text: &str) -> String {
        let mut scored: Vec<(usize, &str)> = Vec::new();

        for sentence in self.sentence_re.split(text).filter_map(|s| s.ok()) {
            let sentence = sentence.trim();
            if sentence.chars().count() < MIN_SENTENCE_CHARS {
                continue;
            }
            let lowered = sentence.to_lowercase();
            let score = KEY_TERMS
                .iter()
                .filter(|term| lowered.contains(*term))
                .count();
            scored.push((score, sentence));
        }

        let top: Vec<&str> = scored
            .iter()
            .sorted_by(|a, b| b.0.cmp(&a.0))
            .take(SYNOPSIS_SENTENCES)
            .map(|(_, sentence)| *sentence)
            .collect();

        if top.is_empty() {
            snippet(text, SYNOPSIS_FALLBACK_CHARS)
        } else {
            top.join(". ")
        }
    }

    /// One filtered search per detected source, hits concatenated before
    /// downstream ranking. Trades result purity for recall across
    /// near-duplicate source documents.
    fn fan_out(
        &self,
        enhanced_query: &str,
        sources: &[String],
        per_source: usize,
        unfiltered: usize,
    ) -> Result<Vec<SearchHit>> {
        if sources.is_empty() {
            return self.store.search(enhanced_query, unfiltered, None);
        }

        let mut hits = Vec::new();
        for source in sources {
            let filter: Metadata =
                std::iter::once(("source".to_string(), json!(source))).collect();
            hits.extend(self.store.search(enhanced_query, per_source, Some(&filter))?);
        }
        Ok(hits)
    }

    /// Build the report body from surviving hits: skip short passages,
    /// compress each to its key sentences, drop prefix-duplicates, cap at
    /// three results.
    fn assemble_results(
        &self,
        hits: &[SearchHit],
        min_passage_chars: usize,
        body_budget: Option<usize>,
        label: &str,
        separator: &str,
    ) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut sections = Vec::new();

        for hit in hits {
            if hit.text.trim().chars().count() < min_passage_chars {
                continue;
            }

            let key_info = self.extract_key_info(&hit.text);
            let prefix: String = key_info.chars().take(DEDUP_PREFIX_CHARS).collect();
            if !seen.insert(prefix) {
                continue;
            }

            let body = match body_budget {
                Some(budget) => snippet(&key_info, budget),
                None => key_info,
            };

            let source = metadata_display(&hit.metadata, "source");
            let page = metadata_display(&hit.metadata, "page");
            sections.push(format!(
                "\n{} {}{} {} (Page {})\n{}\n{}",
                label,
                sections.len() + 1,
                separator,
                source,
                page,
                DIVIDER,
                body
            ));

            if sections.len() >= MAX_REPORT_RESULTS {
                break;
            }
        }

        sections
    }

    /// Troubleshooting report for an appliance error code.
    #[inline]
    pub fn search_error_code(&self, error_code: &str) -> Result<RetrievalOutcome> {
        let sources = self.catalog.detect(error_code, self.strategy);
        let enhanced = self.rewrite_query(error_code, QueryKind::ErrorCode);
        debug!("Enhanced query: '{}'", enhanced);

        let hits = self.fan_out(&enhanced, &sources, 3, 5)?;
        if hits.is_empty() {
            let message = if let Some(source) = sources.first() {
                format!(
                    "No information found for error code '{}' in {}. Please check the manual or contact support.",
                    error_code,
                    prettify_source(source)
                )
            } else {
                format!(
                    "No information found for error code '{}'. Please check the manual or contact support.",
                    error_code
                )
            };
            return Ok(RetrievalOutcome::NotFound { message });
        }

        let sections = self.assemble_results(&hits, 100, None, "SOURCE", ":");
        if sections.is_empty() {
            return Ok(RetrievalOutcome::NotFound {
                message: format!("No detailed information found for error code '{error_code}'."),
            });
        }

        let mut parts = vec![
            format!("ERROR CODE: {}\n", error_code.to_uppercase()),
            SEPARATOR.to_string(),
        ];
        parts.extend(sections);
        parts.push(format!("\n{SEPARATOR}"));
        Ok(RetrievalOutcome::Found(parts.join("\n")))
    }

    /// Troubleshooting report for a free-text symptom description.
    #[inline]
    pub fn search_symptom(&self, symptom: &str) -> Result<RetrievalOutcome> {
        let sources = self.catalog.detect(symptom, self.strategy);
        let enhanced = self.rewrite_query(symptom, QueryKind::Symptom);
        debug!("Enhanced query: '{}'", enhanced);

        let hits = self.fan_out(&enhanced, &sources, 5, 7)?;
        if hits.is_empty() {
            let message = if let Some(source) = sources.first() {
                format!(
                    "No troubleshooting information found for {}. Try describing the problem differently.",
                    prettify_source(source)
                )
            } else {
                "No relevant troubleshooting information found. Please describe the issue in more detail."
                    .to_string()
            };
            return Ok(RetrievalOutcome::NotFound { message });
        }

        let sections = self.assemble_results(&hits, 150, Some(1000), "SOLUTION", " -");
        if sections.is_empty() {
            return Ok(RetrievalOutcome::NotFound {
                message: format!(
                    "No detailed troubleshooting steps found for: {symptom}. \
                     Try describing the problem differently or mention any error codes shown."
                ),
            });
        }

        let mut parts = vec![
            format!("TROUBLESHOOTING: {symptom}\n"),
            SEPARATOR.to_string(),
        ];
        parts.extend(sections);
        parts.push(format!("\n{SEPARATOR}"));
        Ok(RetrievalOutcome::Found(parts.join("\n")))
    }

    /// Spare-part lookup biased toward pricing and part-number lines.
    #[inline]
    pub fn search_spare_parts(&self, part_query: &str) -> Result<RetrievalOutcome> {
        let enhanced = self.rewrite_query(part_query, QueryKind::SpareParts);
        debug!("Enhanced query: '{}'", enhanced);

        let hits = self.store.search(&enhanced, 5, None)?;
        if hits.is_empty() {
            return Ok(RetrievalOutcome::NotFound {
                message: format!("No spare part information found for '{part_query}'."),
            });
        }

        let mut parts = vec![
            format!("SPARE PARTS: {part_query}\n"),
            SEPARATOR.to_string(),
        ];
        let mut found_info = false;

        for hit in &hits {
            let lowered = hit.text.to_lowercase();
            let has_price =
                lowered.contains('₹') || lowered.contains("rs") || lowered.contains("price");
            let has_part_number =
                lowered.contains("part") && hit.text.chars().any(|c| c.is_ascii_digit());

            if has_price || has_part_number {
                found_info = true;
                let source = metadata_display(&hit.metadata, "source");
                let page = metadata_display(&hit.metadata, "page");
                parts.push(format!("\n{} (Page {})\n{}", source, page, DIVIDER));

                let relevant: Vec<&str> = hit
                    .text
                    .lines()
                    .filter(|line| {
                        let line_lower = line.to_lowercase();
                        PART_LINE_TERMS.iter().any(|term| line_lower.contains(term))
                    })
                    .take(5)
                    .collect();

                if relevant.is_empty() {
                    parts.push(snippet(&hit.text, 400));
                } else {
                    parts.push(relevant.join("\n"));
                }
            }
        }

        if !found_info {
            parts.push("\nNo specific pricing found. Available information:\n".to_string());
            parts.push(snippet(&hits[0].text, 400));
        }

        parts.push(format!("\n{SEPARATOR}"));
        parts.push("\nTIP: For exact pricing and availability, contact our parts department.".to_string());
        Ok(RetrievalOutcome::Found(parts.join("\n")))
    }

    /// Standard-operating-procedure lookup: tries the `document_type = sop`
    /// filter first and falls back to the whole corpus.
    #[inline]
    pub fn search_sop(&self, query: &str) -> Result<RetrievalOutcome> {
        let enhanced = self.rewrite_query(query, QueryKind::Sop);

        let filter: Metadata =
            std::iter::once(("document_type".to_string(), json!("sop"))).collect();
        let mut hits = self.store.search(&enhanced, 3, Some(&filter))?;
        if hits.is_empty() {
            hits = self.store.search(&enhanced, 3, None)?;
        }

        if hits.is_empty() {
            return Ok(RetrievalOutcome::NotFound {
                message: format!("No policy/procedure found for: {query}"),
            });
        }

        let mut parts = vec![
            format!("POLICY/PROCEDURE: {query}\n"),
            SEPARATOR.to_string(),
        ];
        for (index, hit) in hits.iter().enumerate() {
            let source = metadata_display(&hit.metadata, "source");
            parts.push(format!(
                "\n{}. {}\n{}\n{}",
                index + 1,
                source,
                DIVIDER,
                snippet(&hit.text, 600)
            ));
        }
        parts.push(format!("\n{SEPARATOR}"));
        Ok(RetrievalOutcome::Found(parts.join("\n")))
    }

    /// General-purpose search returning raw hits for custom processing.
    #[inline]
    pub fn general_search(&self, query: &str, n_results: usize) -> Result<Vec<SearchHit>> {
        let enhanced = self.rewrite_query(query, QueryKind::General);
        self.store.search(&enhanced, n_results, None)
    }
}

fn metadata_display(metadata: &Metadata, key: &str) -> String {
    match metadata.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "Unknown".to_string(),
    }
}

/// Turn a source filename into something speakable ("washing_maching.pdf"
/// becomes "washing maching").
fn prettify_source(source: &str) -> String {
    source.trim_end_matches(".pdf").replace('_', " ")
}
