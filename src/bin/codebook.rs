//! Codebook CLI: incremental codebook synthesis over JSONL fragments.
//!
//! Usage:
//!   codebook run --input fragments.jsonl [--config synthesis.yaml] [--db path]
//!   codebook show [--db path]
//!   codebook assignments [--evidence ID] [--db path]
//!   codebook export [--output codebook.json] [--db path]
//!
//! A `--db` path ending in `.json` selects the JSON file store; anything else
//! is a SQLite database.

use clap::{Parser, Subcommand};
use codebook::{
    read_fragments_jsonl, CancellationToken, CodeId, CodebookExport, CodebookState, CodebookStore,
    JsonFileStore, OpenStore, PrecodedGenerator, SqliteStore, SynthesisConfig, Synthesizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "codebook",
    version,
    about = "Incremental codebook synthesis for qualitative coding"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the codebook store (SQLite, or JSON if it ends in .json)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the pre-generated codes of a JSONL fragment file into the codebook
    Run {
        /// JSONL file, one fragment per line
        #[arg(long)]
        input: PathBuf,
        /// YAML synthesis configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the merge threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Override the number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,
        /// Similarity index: flat or sqlite-vec
        #[arg(long, default_value = "flat")]
        index: String,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List canonical codes
    Show,
    /// List the codes assigned to each evidence fragment
    Assignments {
        /// Only this evidence id
        #[arg(long)]
        evidence: Option<String>,
    },
    /// Write the codebook and assignment map as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Get the default database path (~/.local/share/codebook/codebook.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("codebook").join("codebook.db")
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<dyn CodebookStore>, String> {
    let path = db.unwrap_or_else(default_db_path);
    if path.extension().is_some_and(|ext| ext == "json") {
        return Ok(Arc::new(JsonFileStore::new(path)));
    }
    let store = SqliteStore::open(&path)
        .map_err(|e| format!("Failed to open database {}: {}", path.display(), e))?;
    Ok(Arc::new(store))
}

fn load_state(store: &dyn CodebookStore) -> Result<CodebookState, String> {
    store
        .load()
        .map_err(|e| format!("Failed to load codebook: {}", e))
}

#[cfg(feature = "embeddings")]
fn default_embedder() -> Result<Arc<dyn codebook::Embedder>, String> {
    let embedder = codebook::FastEmbedEmbedder::default_model()
        .map_err(|e| format!("Failed to load embedding model: {}", e))?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "embeddings"))]
fn default_embedder() -> Result<Arc<dyn codebook::Embedder>, String> {
    Err("this build has no embedding backend; rebuild with --features embeddings".to_string())
}

#[cfg(feature = "embeddings")]
fn sqlite_vec_index(dimensions: usize) -> Result<Box<dyn codebook::SimilarityIndex>, String> {
    let index = codebook::SqliteVecIndex::open_in_memory(dimensions)
        .map_err(|e| format!("Failed to open sqlite-vec index: {}", e))?;
    Ok(Box::new(index))
}

#[cfg(not(feature = "embeddings"))]
fn sqlite_vec_index(_dimensions: usize) -> Result<Box<dyn codebook::SimilarityIndex>, String> {
    Err("sqlite-vec index requires --features embeddings".to_string())
}

struct RunArgs {
    input: PathBuf,
    config: Option<PathBuf>,
    threshold: Option<f32>,
    workers: Option<usize>,
    index: String,
    json: bool,
}

fn load_config(args: &RunArgs) -> Result<SynthesisConfig, String> {
    let mut config = match &args.config {
        Some(path) => SynthesisConfig::from_yaml_file(path)
            .map_err(|e| format!("Failed to load config {}: {}", path.display(), e))?,
        None => SynthesisConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config = config.with_threshold(threshold);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn cmd_run(store: Arc<dyn CodebookStore>, args: RunArgs) -> i32 {
    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let batch = match read_fragments_jsonl(&args.input) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", args.input.display(), e);
            return 1;
        }
    };
    if batch.skipped_lines > 0 {
        eprintln!(
            "Warning: skipped {} unreadable line(s) in {}",
            batch.skipped_lines,
            args.input.display()
        );
    }
    let embedder = match default_embedder() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let mut synthesizer =
            match Synthesizer::open(config, store, Arc::new(PrecodedGenerator::new()), embedder) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            };

        if args.index == "sqlite-vec" {
            let dimensions = match synthesizer.codebook().dimension() {
                Some(d) => d,
                None => match model_dimension(&synthesizer).await {
                    Ok(d) => d,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        return 1;
                    }
                },
            };
            synthesizer = match sqlite_vec_index(dimensions)
                .and_then(|index| synthesizer.with_index(index).map_err(|e| e.to_string()))
            {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            };
        } else if args.index != "flat" {
            eprintln!("Error: unknown index '{}' (expected flat or sqlite-vec)", args.index);
            return 1;
        }

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted: finishing the current fragment and saving");
                on_signal.cancel();
            }
        });

        match synthesizer.run(batch.fragments, &cancel).await {
            Ok(summary) => {
                if args.json {
                    match serde_json::to_string_pretty(&summary) {
                        Ok(json) => println!("{}", json),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            return 1;
                        }
                    }
                } else {
                    print!("{}", summary);
                }
                if summary.cancelled_fragments.is_empty() {
                    0
                } else {
                    130
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("The last checkpoint in the store is intact.");
                1
            }
        }
    })
}

/// Ask the embedding model for its output dimension.
async fn model_dimension(synthesizer: &Synthesizer) -> Result<usize, String> {
    synthesizer
        .embeddings()
        .output_dimension()
        .await
        .map_err(|e| e.to_string())
}

fn cmd_show(store: &dyn CodebookStore) -> i32 {
    let state = match load_state(store) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if state.codebook.is_empty() {
        println!("Codebook is empty.");
        return 0;
    }
    println!("{:<8}  {:<40}  {:>6}  {:>8}  {:>8}", "ID", "LABEL", "COUNT", "EVIDENCE", "SYNONYMS");
    println!("{}", "-".repeat(80));
    for code in state.codebook.iter() {
        println!(
            "{:<8}  {:<40}  {:>6}  {:>8}  {:>8}",
            code.code_id,
            code.canonical_label,
            code.occurrence_count,
            code.evidence_ids.len(),
            code.synonym_labels.distinct()
        );
    }
    0
}

fn cmd_assignments(store: &dyn CodebookStore, evidence: Option<&str>) -> i32 {
    let state = match load_state(store) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let label_of = |id: &CodeId| -> String {
        state
            .codebook
            .get(id)
            .map(|c| c.canonical_label.clone())
            .unwrap_or_else(|| "?".to_string())
    };
    match evidence {
        Some(evidence_id) => {
            let codes = state.ledger.assignments_for(evidence_id);
            if codes.is_empty() {
                eprintln!("Error: no codes assigned to '{}'", evidence_id);
                return 1;
            }
            for id in codes {
                println!("{}  {}", id, label_of(id));
            }
        }
        None => {
            for (evidence_id, codes) in state.ledger.assignments() {
                let labels: Vec<String> = codes
                    .iter()
                    .map(|id| format!("{} {}", id, label_of(id)))
                    .collect();
                println!("{}: {}", evidence_id, labels.join("; "));
            }
        }
    }
    0
}

fn cmd_export(store: &dyn CodebookStore, output: Option<&Path>) -> i32 {
    let state = match load_state(store) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let json = match CodebookExport::build(&state.codebook, &state.ledger).to_json_pretty() {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match output {
        Some(path) => match std::fs::write(path, json) {
            Ok(()) => {
                println!("Exported {} codes to {}", state.codebook.len(), path.display());
                0
            }
            Err(e) => {
                eprintln!("Error: cannot write {}: {}", path.display(), e);
                1
            }
        },
        None => {
            println!("{}", json);
            0
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = match open_store(cli.db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Run {
            input,
            config,
            threshold,
            workers,
            index,
            json,
        } => cmd_run(
            store,
            RunArgs {
                input,
                config,
                threshold,
                workers,
                index,
                json,
            },
        ),
        Commands::Show => cmd_show(store.as_ref()),
        Commands::Assignments { evidence } => cmd_assignments(store.as_ref(), evidence.as_deref()),
        Commands::Export { output } => cmd_export(store.as_ref(), output.as_deref()),
    };
    std::process::exit(code);
}
