//! CLI for creating, filling and querying saved indexes

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use simdex::config::DEFAULT_K;
use simdex::embedding::parse_embedding;
use simdex::{load_search, HnswSearch, LinearSearch, Search};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simdex")]
#[command(about = "Nearest-neighbor index for embeddings", long_about = None)]
struct Cli {
    /// Log info-level messages (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy)]
enum Backend {
    Linear,
    Hnsw,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty index directory
    Create {
        /// Index directory
        path: PathBuf,
        #[arg(long, value_enum, default_value = "linear")]
        backend: Backend,
        /// Distance name (euclidean, l2, squared_euclidean, manhattan, cosine)
        #[arg(long, default_value = "cosine")]
        distance: String,
        /// Embedding dimension
        #[arg(long)]
        dim: usize,
        /// Instance name
        #[arg(long)]
        name: Option<String>,
    },
    /// Add an embedding to a saved index
    Add {
        /// Index directory
        path: PathBuf,
        /// Id of the embedding
        #[arg(long)]
        idx: u64,
        /// Embedding as comma-separated values (e.g., "1.0,2.0,3.0")
        #[arg(short, long)]
        embedding: String,
    },
    /// Find the nearest neighbors of a query embedding
    Lookup {
        /// Index directory
        path: PathBuf,
        /// Query as comma-separated values (e.g., "1.0,2.0,3.0")
        query: String,
        /// Number of results to return
        #[arg(short, long, default_value_t = DEFAULT_K)]
        k: usize,
    },
    /// Print the configuration record and size of a saved index
    Info {
        /// Index directory
        path: PathBuf,
    },
}

fn open(path: &Path) -> Result<Box<dyn Search>> {
    load_search(path).with_context(|| format!("failed to open index at {}", path.display()))
}

/// Build an empty backend, named `name` when given.
fn new_search(
    backend: Backend,
    distance: &str,
    dim: usize,
    name: Option<String>,
) -> Result<Box<dyn Search>> {
    Ok(match backend {
        Backend::Linear => {
            let search = LinearSearch::new(distance, dim)?;
            Box::new(match name {
                Some(name) => search.with_name(name),
                None => search,
            })
        }
        Backend::Hnsw => {
            let search = HnswSearch::new(distance, dim)?;
            Box::new(match name {
                Some(name) => search.with_name(name),
                None => search,
            })
        }
    })
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Create {
            path,
            backend,
            distance,
            dim,
            name,
        } => {
            let search = new_search(backend, &distance, dim, name)?;
            search.save(&path)?;
            println!("Created {} at {}", search.canonical_name(), path.display());
        }
        Commands::Add {
            path,
            idx,
            embedding,
        } => {
            let mut search = open(&path)?;
            search.add(&parse_embedding(&embedding)?, idx)?;
            search.save(&path)?;
            println!("Added embedding with id {} ({} total)", idx, search.len());
        }
        Commands::Lookup { path, query, k } => {
            let search = open(&path)?;
            let (ids, distances) = search.lookup(&parse_embedding(&query)?, k)?;

            if ids.is_empty() {
                println!("No results found (index is empty)");
            } else {
                println!("Top {} results:", ids.len());
                for (i, (id, distance)) in ids.iter().zip(&distances).enumerate() {
                    println!("{}. {} (distance: {:.4})", i + 1, id, distance);
                }
            }
        }
        Commands::Info { path } => {
            let search = open(&path)?;
            println!("{}", serde_json::to_string_pretty(&search.get_config())?);
            println!("embeddings: {}", search.len());
            println!("built: {}", search.is_built());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    run(cli.command)
}
