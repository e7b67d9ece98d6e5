use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use evfeed_sync::{EventPipeline, RunConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "evfeed-cli")]
#[command(about = "University event feed: collect, merge and vectorize department events")]
struct Cli {
    /// Corpus file (overrides EVFEED_CORPUS_PATH).
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Vector file (overrides EVFEED_VECTOR_PATH).
    #[arg(long, global = true)]
    vectors: Option<PathBuf>,

    /// Skip the topic vector stage.
    #[arg(long, global = true)]
    no_vectors: bool,

    /// Topic vector dimension (overrides EVFEED_VECTOR_DIMENSIONS).
    #[arg(long, global = true)]
    dimensions: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect from every source, merge into the corpus, recompute vectors.
    Run,
    /// Recompute topic vectors from the saved corpus only.
    Vectorize,
    /// Print corpus statistics as JSON.
    Stats,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::from_env();
        if let Some(path) = &self.corpus {
            config.corpus_path = path.clone();
        }
        if let Some(path) = &self.vectors {
            config.vector_path = path.clone();
        }
        if self.no_vectors {
            config.produce_vectors = false;
        }
        if let Some(dimensions) = self.dimensions {
            config.vector_dimensions = dimensions;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let pipeline = EventPipeline::new(cli.run_config())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = pipeline.run_once().await?;
            if let Some(error) = &summary.vector_error {
                warn!(%error, "vectors not updated");
            }
            println!(
                "run complete: run_id={} sources={} failed={} collected={} admitted={} duplicates={} corpus={} vectors={}",
                summary.run_id,
                summary.sources.len(),
                summary.failed_sources(),
                summary.collected_records,
                summary.admitted,
                summary.duplicates,
                summary.corpus_size,
                summary
                    .vectors_written
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "skipped".to_string()),
            );
        }
        Commands::Vectorize => {
            let written = pipeline.vectorize().await?;
            println!(
                "vectorize complete: vectors={written} dimensions={} path={}",
                pipeline.config().vector_dimensions,
                pipeline.config().vector_store().path().display()
            );
        }
        Commands::Stats => {
            let stats = pipeline.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
