//! Hydrator CLI - resolve tweets referenced by a local Twitter/X export.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hydrator::config::{ApiConfig, HydrateConfig, ParentIdsPolicy, RetryPolicy, API_KEY_ENV};
use hydrator::input::ExportCategory;
use hydrator::lookup::TwitterApiClient;
use hydrator::pipeline::{scan_exports, Pipeline, PipelineConfig, RunSummary};
use hydrator::storage::HydrationCache;

/// Hydrator CLI - fetch reply parents and quoted tweets missing from an export.
#[derive(Parser)]
#[command(name = "hydrator")]
#[command(about = "Twitter/X export reference hydrator")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Hydrate every referenced tweet missing from the export folder
    Hydrate {
        /// Folder holding the JSONL export files
        folder: PathBuf,

        /// Cache file (default: <folder>/parents.json)
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Failed-ID log (default: <folder>/failed_hydration_ids.txt)
        #[arg(long)]
        failed_log: Option<PathBuf>,

        /// Maximum quote-chain depth
        #[arg(long, default_value = "3")]
        max_depth: u32,

        /// IDs per lookup request
        #[arg(long, default_value = "100")]
        batch_size: usize,

        /// Retries per batch after the first attempt
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Backoff delays in seconds, comma separated
        #[arg(long, value_delimiter = ',', default_value = "60,120,300")]
        backoff_secs: Vec<u64>,

        /// Longest server-requested Retry-After delay honored, in seconds
        #[arg(long, default_value = "600")]
        max_retry_after_secs: u64,

        /// Delay between successful batches, in milliseconds
        #[arg(long, default_value = "50")]
        pacing_ms: u64,

        /// Warn when more requests than this are planned
        #[arg(long, default_value = "75")]
        request_budget: usize,

        /// Re-fetch referenced tweets even if cached
        #[arg(long)]
        refresh: bool,

        /// Only save the cache at the end of the run
        #[arg(long)]
        no_checkpoint: bool,

        /// Export categories to scan (tweets, likes, bookmarks, other)
        #[arg(long, value_delimiter = ',', default_value = "tweets,likes,bookmarks,other")]
        categories: Vec<ExportCategory>,

        /// How parent_ids arrays are interpreted (heuristic, positional)
        #[arg(long, default_value = "heuristic")]
        parent_ids: ParentIdsPolicy,

        /// TwitterAPI.io key (default: $TWITTERAPI_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Lookup API base URL (default: $TWITTERAPI_BASE_URL or https://api.twitterapi.io)
        #[arg(long)]
        base_url: Option<String>,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// List references found in the export folder (no network)
    Refs {
        /// Folder holding the JSONL export files
        folder: PathBuf,

        /// Export categories to scan (tweets, likes, bookmarks, other)
        #[arg(long, value_delimiter = ',', default_value = "tweets,likes,bookmarks,other")]
        categories: Vec<ExportCategory>,

        /// How parent_ids arrays are interpreted (heuristic, positional)
        #[arg(long, default_value = "heuristic")]
        parent_ids: ParentIdsPolicy,

        /// Print every missing ID
        #[arg(long)]
        list: bool,
    },

    /// Show cache statistics
    CacheStats {
        /// Cache file
        cache: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("hydrator=debug,info")
    } else {
        EnvFilter::new("hydrator=info,warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Hydrate {
            folder,
            cache,
            failed_log,
            max_depth,
            batch_size,
            max_retries,
            backoff_secs,
            max_retry_after_secs,
            pacing_ms,
            request_budget,
            refresh,
            no_checkpoint,
            categories,
            parent_ids,
            api_key,
            base_url,
            timeout_secs,
        } => {
            let mut config = PipelineConfig::for_folder(folder);
            if let Some(cache) = cache {
                config.cache_path = cache;
            }
            if let Some(failed_log) = failed_log {
                config.failed_log_path = failed_log;
            }
            config.hydrate = HydrateConfig {
                batch_size,
                retry: RetryPolicy {
                    max_retries,
                    backoff: backoff_secs.into_iter().map(Duration::from_secs).collect(),
                    max_retry_after: Duration::from_secs(max_retry_after_secs),
                },
                pacing_delay: Duration::from_millis(pacing_ms),
                max_depth,
                parent_ids_policy: parent_ids,
                categories,
                refresh,
                checkpoint_each_round: !no_checkpoint,
                request_budget,
            };

            let mut api = match api_key {
                Some(key) => ApiConfig::from_vars(|name| {
                    if name == API_KEY_ENV {
                        Some(key.clone())
                    } else {
                        std::env::var(name).ok()
                    }
                })?,
                None => ApiConfig::from_env()?,
            };
            if let Some(base_url) = base_url {
                api = api.with_base_url(base_url);
            }
            api.timeout = Duration::from_secs(timeout_secs);

            tracing::info!(
                input = %config.input_dir.display(),
                cache = %config.cache_path.display(),
                max_depth,
                batch_size,
                refresh,
                "Starting hydration"
            );
            run_hydrate(config, &api).await
        }
        Commands::Refs {
            folder,
            categories,
            parent_ids,
            list,
        } => run_refs(folder, categories, parent_ids, list),
        Commands::CacheStats { cache } => run_cache_stats(cache),
    }
}

async fn run_hydrate(config: PipelineConfig, api: &ApiConfig) -> Result<()> {
    let client = TwitterApiClient::new(api)?;
    let cache_path = config.cache_path.clone();
    let failed_log_path = config.failed_log_path.clone();

    let pipeline = Pipeline::new(config, Arc::new(client));
    let summary = pipeline.run().await?;

    print_summary(&summary);

    if summary.failed > 0 {
        println!("\n📝 Failed IDs appended to {}", failed_log_path.display());
    }

    if summary.final_save_failed {
        anyhow::bail!("Failed to save hydration cache to {}", cache_path.display());
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if summary.nothing_to_hydrate() {
        println!("\n✅ Nothing to hydrate");
        println!("   References: {}", summary.references);
        println!("   Already cached: {}", summary.already_cached);
        println!("   Cache size: {}", summary.cache_size);
        return;
    }

    println!("\n📊 Hydration Summary");
    println!("   Files scanned: {}", summary.input_files);
    println!("   Records scanned: {}", summary.records_scanned);
    if summary.malformed_lines > 0 {
        println!("   Malformed lines: {}", summary.malformed_lines);
    }
    println!("   References: {}", summary.references);
    println!("   Candidates: {}", summary.candidates);
    println!("   Already cached: {}", summary.already_cached);
    println!(
        "   Estimated credits: {} ({} requests planned)",
        summary.estimated_credits, summary.planned_requests
    );
    println!("   Rounds: {}", summary.rounds.len());
    for round in &summary.rounds {
        println!(
            "     - depth {}: requested {}, hydrated {}, not found {}, failed {}, discovered {}",
            round.depth,
            round.requested,
            round.hydrated,
            round.not_found,
            round.failed,
            round.discovered
        );
    }
    println!("   Hydrated: {}", summary.hydrated);
    println!("   Not found: {}", summary.not_found);
    println!("   Failed: {}", summary.failed);
    println!(
        "   Cache: {} records ({} added, {} replaced)",
        summary.cache_size, summary.persisted.added, summary.persisted.replaced
    );

    if let Some(finished_at) = summary.finished_at {
        let elapsed = finished_at - summary.started_at;
        println!("   Duration: {}s", elapsed.num_seconds());
    }

    if !summary.persist_errors.is_empty() {
        println!("   Persistence errors: {}", summary.persist_errors.len());
        for err in &summary.persist_errors {
            eprintln!("     - {err}");
        }
    }
}

fn run_refs(
    folder: PathBuf,
    categories: Vec<ExportCategory>,
    parent_ids: ParentIdsPolicy,
    list: bool,
) -> Result<()> {
    let config = HydrateConfig {
        categories,
        parent_ids_policy: parent_ids,
        ..Default::default()
    };
    config.validate()?;

    let scan = scan_exports(&folder, &config)?;
    let extraction = scan.extraction;
    let missing = extraction.missing();

    println!("🔗 References in {}\n", folder.display());
    println!("   Files scanned: {}", scan.files.len());
    println!("   Records scanned: {}", extraction.records_scanned);
    if extraction.malformed > 0 {
        println!("   Malformed lines: {}", extraction.malformed);
    }
    for (kind, count) in extraction.counts_by_kind() {
        println!("   {kind}: {count}");
    }
    println!("   Missing from export: {}", missing.len());

    if list {
        println!();
        for id in &missing {
            println!("{id}");
        }
    }

    Ok(())
}

fn run_cache_stats(cache: PathBuf) -> Result<()> {
    let loaded = HydrationCache::try_load(&cache)
        .with_context(|| format!("Failed to read cache {}", cache.display()))?;

    println!("📦 Cache: {}", cache.display());
    println!("   Records: {}", loaded.len());
    let empty = loaded
        .ids()
        .filter(|id| loaded.get(id.as_str()).is_some_and(serde_json::Value::is_null))
        .count();
    if empty > 0 {
        println!("   Null records: {empty}");
    }

    Ok(())
}
