// src/main.rs
// =============================================================================
// This is the entry point of our CLI application.
//
// What happens here:
// 1. Parse command-line arguments using clap
// 2. Set up logging (tracing) on stderr
// 3. Build the frontier: from the API (crawl) or from saved batches (expand)
// 4. Run the crawl pipeline and print the summary
// 5. Exit with proper code (0 = all saved, 1 = failures or stall, 2 = error)
// =============================================================================

// Module declarations - tells Rust about our other source files
mod cli;      // src/cli.rs - command-line parsing
mod config;   // src/config.rs - validated run configuration
mod crawl;    // src/crawl/ - discovery, task queue, workers, supervisor
mod error;    // src/error.rs - typed errors
mod graph;    // src/graph/ - API client and pagination
mod sink;     // src/sink/ - batch files and the result aggregator

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, CrawlArgs};
use config::CrawlConfig;
use crawl::RunSummary;
use graph::{Actor, GraphApi, HttpGraphClient};
use sink::BatchArchive;

// Where the frontier of a run comes from
#[derive(Debug, Clone, Copy)]
enum FrontierSource {
    /// Ask the API for the seed's follows and followers
    Discover,
    /// Reuse handles saved for the seed by an earlier run
    Archive,
}

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            // {:#} prints the whole context chain on one line
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Crawl(args) => handle_run(args, FrontierSource::Discover).await,
        Commands::Expand(args) => handle_run(args, FrontierSource::Archive).await,
    }
}

// Logs go to stderr so --json output on stdout stays clean. RUST_LOG wins
// over --verbose; the HTTP stack is kept quiet unless asked for.
fn init_tracing(verbose: bool) -> Result<()> {
    let default = if verbose {
        "debug,hyper=error,reqwest=error"
    } else {
        "info,hyper=error,reqwest=error"
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("could not install logger: {}", e))
}

// Runs one crawl round
//
// Parameters:
//   args: options from the command line
//   source: where the frontier comes from
async fn handle_run(args: CrawlArgs, source: FrontierSource) -> Result<i32> {
    let json = args.json;
    let config = CrawlConfig::try_from(args)?;

    let api: Arc<dyn GraphApi> = Arc::new(
        HttpGraphClient::new(&config.api_base, config.request_timeout)
            .context("could not create API client")?,
    );

    info!("Starting data collection for root actor: {}", config.seed);
    let frontier: HashSet<Actor> = match source {
        FrontierSource::Discover => {
            crawl::discover_frontier(api.as_ref(), &config.seed, config.page_limit).await
        }
        FrontierSource::Archive => {
            let archive = BatchArchive::new(&config.output_dir);
            crawl::frontier_from_provider(&archive, &config.seed)
                .await
                .with_context(|| {
                    format!("could not read saved batches in {}", config.output_dir.display())
                })?
        }
    };

    let summary = crawl::run_pipeline(api, frontier, &config)
        .await
        .context("crawl pipeline failed")?;

    print_summary(&summary, json)?;
    Ok(summary.exit_code())
}

// Prints the summary either as a table or JSON
fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        let json_output = serde_json::to_string_pretty(summary)?;
        println!("{}", json_output);
    } else {
        print_table(summary);
    }
    Ok(())
}

fn print_table(summary: &RunSummary) {
    println!();
    println!("📊 Summary for {}:", summary.seed);
    println!("   ✅ Successful: {}", summary.successful);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   📋 Total: {}", summary.total);
    println!("   ⏱️  Elapsed: {:.1} minutes", summary.elapsed_secs / 60.0);
    println!(
        "   👷 Workers: {} ({} completed, {} terminated, {} killed, {} crashed)",
        summary.pool_size,
        summary.workers_completed,
        summary.workers_terminated,
        summary.workers_killed,
        summary.workers_crashed
    );

    if summary.stalled {
        println!("   ⚠️  Result stream timed out before every actor was saved");
    }

    if !summary.files.is_empty() {
        println!();
        println!("{:<80}", "FILES WRITTEN");
        println!("{}", "=".repeat(80));
        for file in &summary.files {
            println!("{}", file.display());
        }
    }
}
