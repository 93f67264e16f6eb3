//! # Engagement Hub CLI (`ehub`)
//!
//! ## Usage
//!
//! ```bash
//! ehub --config ./config/ehub.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ehub init` | Create the SQLite database and run schema migrations |
//! | `ehub serve` | Start the HTTP API server |
//! | `ehub extract <path>` | Run the text extractor on a local file |
//! | `ehub analyze <id>...` | Analyse stored documents and save the results |
//! | `ehub vendors <project-id>` | List vendors ranked by weighted score |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use engagement_hub::analysis::BatchAnalyzer;
use engagement_hub::store::SqliteStore;
use engagement_hub::{config, documents, extract, llm, migrate, server, storage, vendors};

/// Engagement Hub: requirement analysis and vendor scoring for
/// software-development engagements.
#[derive(Parser)]
#[command(name = "ehub", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ehub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Extract text from a local file and print it.
    ///
    /// Does not read the config file.
    Extract {
        path: PathBuf,
    },

    /// Analyse stored documents by id and save successful results.
    Analyze {
        #[arg(required = true)]
        document_ids: Vec<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List a project's vendors ranked by total score.
    Vendors {
        project_id: String,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("engagement_hub=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Extract { ref path } = cli.command {
        return run_extract(path);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze { document_ids, json } => {
            run_analyze(&cfg, &document_ids, json).await?;
        }
        Commands::Vendors { project_id, json } => {
            run_vendors(&cfg, &project_id, json).await?;
        }
        Commands::Extract { .. } => {}
    }

    Ok(())
}

fn run_extract(path: &Path) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let extraction = extract::extract(&bytes, &file_name)?;
    println!("kind: {}", extraction.metadata.kind.as_str());
    println!("{}", extraction.text);
    Ok(())
}

async fn run_analyze(cfg: &config::Config, ids: &[String], json: bool) -> anyhow::Result<()> {
    let store = SqliteStore::open(cfg).await?;
    let blobs = storage::create_blob_store(&cfg.storage)?;
    let model = llm::create_model(&cfg.models.analysis)?;
    let analyzer = BatchAnalyzer::from_config(model, &cfg.analysis);

    let results = documents::analyze(&store, blobs.as_ref(), &analyzer, None, ids).await;
    store.close().await;
    let results = results?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        match result.error {
            Some(ref error) => println!("✗ {}: {}", result.document_id, error),
            None => {
                println!("✓ {}", result.document_id);
                println!("{}", result.analysis);
            }
        }
        println!();
    }
    let failed = results.iter().filter(|r| !r.is_success()).count();
    println!(
        "{} document(s) analysed, {} failed.",
        results.len() - failed,
        failed
    );
    Ok(())
}

async fn run_vendors(cfg: &config::Config, project_id: &str, json: bool) -> anyhow::Result<()> {
    let store = SqliteStore::open(cfg).await?;
    let scores = vendors::ranked_scores(&store, project_id, cfg.scoring.duplicate_policy).await;
    store.close().await;
    let scores = scores?;

    if json {
        println!("{}", serde_json::to_string_pretty(&scores)?);
        return Ok(());
    }

    if scores.is_empty() {
        println!("No vendors for project {}.", project_id);
        return Ok(());
    }

    println!(
        "{:<4} {:<28} {:<12} {:>9} {:>6} {:>10} {:>8} {:>7}",
        "#", "VENDOR", "STATUS", "TECHNICAL", "COST", "EXPERIENCE", "SUPPORT", "TOTAL"
    );
    for (i, v) in scores.iter().enumerate() {
        println!(
            "{:<4} {:<28} {:<12} {:>9.2} {:>6.2} {:>10.2} {:>8.2} {:>7.2}",
            i + 1,
            v.name,
            v.status.as_str(),
            v.technical_score,
            v.cost_score,
            v.experience_score,
            v.support_score,
            v.total_score
        );
    }
    Ok(())
}
