use clap::{Parser, Subcommand};
use kb_rag::Result;
use kb_rag::commands::{
    error_code, ingest, init_config, resolve_config_dir, search, show_config, show_stats, sop,
    spare_parts, symptom,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kb-rag")]
#[command(about = "A knowledge base with vector search for appliance service manuals")]
#[command(version)]
struct Cli {
    /// Override the configuration directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Write the default configuration file to disk
        #[arg(long)]
        init: bool,
    },
    /// Ingest text documents from a directory into the knowledge base
    Ingest {
        /// Directory containing .txt/.md files to ingest
        docs_dir: PathBuf,
    },
    /// Run a raw similarity search against the knowledge base
    Search {
        /// Free-text query
        query: String,
        /// Maximum number of results to return
        #[arg(long, short, default_value_t = 5)]
        n_results: usize,
    },
    /// Look up an appliance error code
    ErrorCode {
        /// Error code, e.g. "E4" or "washing machine E4"
        code: String,
    },
    /// Look up troubleshooting steps for a symptom description
    Symptom {
        /// Free-text description of the problem
        description: String,
    },
    /// Look up spare part details and pricing
    SpareParts {
        /// Part name or description
        query: String,
    },
    /// Look up a policy or standard operating procedure
    Sop {
        /// Policy or procedure to find
        query: String,
    },
    /// Show knowledge base statistics
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir)?;

    match cli.command {
        Commands::Config { init } => {
            if init {
                init_config(&config_dir)?;
            } else {
                show_config(&config_dir)?;
            }
        }
        Commands::Ingest { docs_dir } => {
            ingest(&config_dir, &docs_dir)?;
        }
        Commands::Search { query, n_results } => {
            search(&config_dir, &query, n_results)?;
        }
        Commands::ErrorCode { code } => {
            error_code(&config_dir, &code)?;
        }
        Commands::Symptom { description } => {
            symptom(&config_dir, &description)?;
        }
        Commands::SpareParts { query } => {
            spare_parts(&config_dir, &query)?;
        }
        Commands::Sop { query } => {
            sop(&config_dir, &query)?;
        }
        Commands::Stats => {
            show_stats(&config_dir)?;
        }
    }

    Ok(())
}
