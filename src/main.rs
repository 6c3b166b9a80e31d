use anyhow::Result;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import modules from the library crate
use rarity_ranker::collection_store::SqliteCollectionStore;
use rarity_ranker::config::{self, AppConfig, FileConfig, DEFAULT_BATCH_SIZE};
use rarity_ranker::fetcher::{HttpMetadataSource, MetadataFetcher};
use rarity_ranker::pipeline::{PipelineError, PipelineSettings, RarityPipeline};
use rarity_ranker::rank::TokenRank;

/// How many tokens to list from each end of the ranking.
const REPORT_SIZE: usize = 15;

const RARITY_SNIPER_URL: &str = "https://raritysniper.com/pudgy-penguins";
const GEM_URL: &str = "https://www.gem.xyz/asset/0xbd3531da5cf5857e7cfaa92426877b022e612cf8";

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path of the SQLite database holding records and scores.
    #[clap(long, default_value = "collection.db", value_parser = parse_path)]
    pub db_file: PathBuf,

    /// How many tokens to fetch or score between two commits.
    #[clap(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Drop all stored records and fetch the collection again.
    #[clap(long)]
    pub refresh_metadata: bool,

    /// Drop all stored scores and recompute them.
    #[clap(long)]
    pub refresh_scores: bool,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_file: args.db_file.clone(),
            batch_size: args.batch_size,
            refresh_metadata: args.refresh_metadata,
            refresh_scores: args.refresh_scores,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(config::CliConfig::from(&cli_args), file_config);

    info!("Opening collection database: {:?}", config.db_file);
    let store = SqliteCollectionStore::open(&config.db_file)?;
    let source = HttpMetadataSource::new(config.base_url.clone(), config.request_timeout_secs)?;
    let fetcher = MetadataFetcher::new(source, config.fetch_concurrency);
    let pipeline = RarityPipeline::new(
        store,
        fetcher,
        PipelineSettings {
            collection_size: config.collection_size,
            batch_size: config.batch_size,
        },
    );

    // Fetch data
    pipeline.populate_metadata(config.refresh_metadata).await?;

    // Score it
    pipeline.populate_scores(config.refresh_scores)?;

    // Show some interesting stats
    let ranks = pipeline.rarity_ranks()?;
    print_ranking_extremes(&ranks);

    run_token_prompt(&pipeline)
}

fn print_ranking_extremes(ranks: &[TokenRank]) {
    println!("\nThe most rare tokens:");
    for entry in ranks.iter().take(REPORT_SIZE) {
        println!(
            "Rank #{}: {} with a rarity score of {}",
            entry.rank, entry.token, entry.rarity_score
        );
    }

    println!("\nThe most common tokens:");
    for entry in ranks.iter().rev().take(REPORT_SIZE) {
        println!(
            "Rank #{}: {} with a rarity score of {}",
            entry.rank, entry.token, entry.rarity_score
        );
    }
}

fn run_token_prompt(
    pipeline: &RarityPipeline<SqliteCollectionStore, HttpMetadataSource>,
) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("\nEnter any token you'd like stats for:");

    loop {
        match rl.readline("--> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                let token: u32 = match line.trim().parse() {
                    Ok(token) => token,
                    Err(_) => {
                        println!("Not a token number: {}", line.trim());
                        continue;
                    }
                };
                match pipeline.rank_for_token(token) {
                    Ok(entry) => {
                        println!("Rank: {}", entry.rank);
                        println!("Rarity Score: {}", entry.rarity_score);
                        println!("Percentile Score: {}", entry.percent_rank);
                        println!("Rarity Sniper: {}/{}", RARITY_SNIPER_URL, token);
                        println!("Gem: {}/{}", GEM_URL, token);
                    }
                    Err(PipelineError::UnknownToken(_)) => {
                        println!("Token {} is not part of the collection", token);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
