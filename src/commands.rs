use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, get_config_dir};
use crate::embeddings;
use crate::ingest::{ChunkingConfig, DocumentIngester};
use crate::retriever::{KnowledgeRetriever, RetrievalOutcome, SourceCatalog};
use crate::store::VectorStore;
use crate::{RagError, Result};

/// Resolve the configuration directory, preferring an explicit override.
pub fn resolve_config_dir(override_dir: Option<PathBuf>) -> Result<PathBuf> {
    match override_dir {
        Some(dir) => Ok(dir),
        None => get_config_dir().map_err(|e| RagError::Config(e.to_string())),
    }
}

fn open_store(config: &Config) -> Result<VectorStore> {
    let embedder = embeddings::from_config(config)?;
    let store = VectorStore::new(config.store_path(), embedder);
    store.connect()?;
    Ok(store)
}

fn open_retriever(config: &Config) -> Result<KnowledgeRetriever> {
    let store = Arc::new(open_store(config)?);
    KnowledgeRetriever::new(
        store,
        SourceCatalog::appliance_manuals(),
        config.retriever.match_strategy,
    )
}

fn print_outcome(outcome: RetrievalOutcome) {
    if outcome.is_found() {
        println!("{}", outcome.into_text());
    } else {
        println!("{}", style(outcome.into_text()).yellow());
    }
}

/// Ingest every supported file from a directory into the knowledge base.
pub fn ingest(config_dir: &Path, docs_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    let store = open_store(&config)?;
    let ingester = DocumentIngester::new(ChunkingConfig::default())?;

    info!("Ingesting documents from {}", docs_dir.display());

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(format!("Ingesting from {}", docs_dir.display()));
    bar.enable_steady_tick(std::time::Duration::from_millis(100));

    let report = ingester.ingest_directory(&store, docs_dir);
    bar.finish_and_clear();
    let report = report?;

    if report.chunks == 0 {
        println!(
            "{}",
            style(format!("No documents ingested from {}", docs_dir.display())).yellow()
        );
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "Ingested {} chunks from {} files",
            report.chunks, report.files
        ))
        .green()
    );
    let stats = store.get_collection_stats()?;
    println!("Knowledge base now holds {} chunks", stats.count);
    Ok(())
}

/// Raw similarity search, printed one hit per block.
pub fn search(config_dir: &Path, query: &str, n_results: usize) -> Result<()> {
    let config = Config::load(config_dir)?;
    let retriever = open_retriever(&config)?;

    let hits = retriever.general_search(query, n_results)?;
    if hits.is_empty() {
        println!("{}", style("No results found.").yellow());
        return Ok(());
    }

    println!("Results for '{}':", style(query).cyan());
    for (index, hit) in hits.iter().enumerate() {
        let source = hit
            .metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown");
        println!();
        println!(
            "{} {} (score {:.3})",
            style(format!("{}.", index + 1)).bold(),
            style(source).cyan(),
            hit.score
        );
        println!("{}", crate::store::snippet(&hit.text, 300));
    }
    Ok(())
}

/// Formatted troubleshooting report for an appliance error code.
pub fn error_code(config_dir: &Path, code: &str) -> Result<()> {
    let config = Config::load(config_dir)?;
    let retriever = open_retriever(&config)?;
    print_outcome(retriever.search_error_code(code)?);
    Ok(())
}

/// Formatted troubleshooting report for a symptom description.
pub fn symptom(config_dir: &Path, description: &str) -> Result<()> {
    let config = Config::load(config_dir)?;
    let retriever = open_retriever(&config)?;
    print_outcome(retriever.search_symptom(description)?);
    Ok(())
}

/// Spare-part lookup with pricing and part-number extraction.
pub fn spare_parts(config_dir: &Path, part_query: &str) -> Result<()> {
    let config = Config::load(config_dir)?;
    let retriever = open_retriever(&config)?;
    print_outcome(retriever.search_spare_parts(part_query)?);
    Ok(())
}

/// Policy and procedure lookup.
pub fn sop(config_dir: &Path, query: &str) -> Result<()> {
    let config = Config::load(config_dir)?;
    let retriever = open_retriever(&config)?;
    print_outcome(retriever.search_sop(query)?);
    Ok(())
}

/// Show knowledge base statistics.
pub fn show_stats(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    let store = open_store(&config)?;
    let stats = store.get_collection_stats()?;

    println!("{}", style("Knowledge Base").bold().cyan());
    println!("  Backend: {}", style(&stats.backend).cyan());
    println!("  Chunks: {}", style(stats.count).cyan());
    println!("  Dimension: {}", style(stats.dimension).cyan());
    println!("  Location: {}", style(stats.store_dir.display()).dim());
    Ok(())
}

/// Show the active configuration.
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;

    eprintln!("{}", style("Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!(
        "  Backend: {}",
        style(format!("{:?}", config.embedding.backend)).cyan()
    );
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    eprintln!("  Endpoint: {}", style(&config.embedding.remote.endpoint).cyan());
    eprintln!("  Model: {}", style(config.embedding.remote.model_id()).cyan());
    eprintln!(
        "  API key variable: {}",
        style(&config.embedding.remote.api_key_env).cyan()
    );
    eprintln!(
        "  Timeout: {}s",
        style(config.embedding.remote.timeout_seconds).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Retriever Settings:").bold().yellow());
    eprintln!(
        "  Match strategy: {}",
        style(format!("{:?}", config.retriever.match_strategy)).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config_dir.join("config.toml").display()).dim()
    );
    eprintln!("Store directory: {}", style(config.store_path().display()).dim());
    Ok(())
}

/// Write the default configuration to disk so it can be edited.
pub fn init_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;
    config.save()?;
    println!(
        "{}",
        style(format!(
            "Wrote configuration to {}",
            config_dir.join("config.toml").display()
        ))
        .green()
    );
    Ok(())
}
