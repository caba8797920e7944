//! Command-line front-end for the Overtone fingerprint engine.
//!
//! `register` and `query` run the pipeline once and exit; `serve` exposes
//! the same verbs over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use overtone::pipeline::Engine;
use overtone::server;
use overtone::store::IndexStore;

#[derive(Parser, Debug)]
#[command(version, about = "Landmark-hash audio identification")]
struct Cli {
    /// Directory holding hashes.log and songs.json
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fingerprint a clip and add it to the index
    Register {
        path: PathBuf,

        /// Display name; defaults to the file name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Identify a clip against the index
    Query { path: PathBuf },

    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let store = IndexStore::open(&cli.data_dir)?;
    let engine = Engine::new(store);

    match cli.command {
        Commands::Register { path, name } => {
            let name = name.unwrap_or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Untitled".to_string())
            });

            let registration = tokio::task::spawn_blocking(move || {
                engine.register_file(&path, &name)
            })
            .await??;

            println!(
                "registered '{}' as song {} ({} hashes)",
                registration.song_name, registration.song_id, registration.hash_count
            );
        }

        Commands::Query { path } => {
            let result =
                tokio::task::spawn_blocking(move || engine.identify_file(&path)).await??;

            if result.is_match() {
                println!(
                    "match: '{}' (song {}) with {}/{} hashes, confidence {:.1}%",
                    result.song_name,
                    result.song_id,
                    result.match_count,
                    result.total,
                    result.confidence * 100.0
                );
            } else {
                println!("no match ({} query hashes)", result.total);
            }
        }

        Commands::Serve { addr } => {
            server::serve(&addr, Arc::new(engine)).await?;
        }
    }

    Ok(())
}
