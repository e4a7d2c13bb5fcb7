// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Two subcommands share the same set of options:
// - crawl:  ask the API who the seed follows / is followed by, then crawl them
// - expand: reuse handles already saved for the seed, then crawl them
//
// The seed actor can come from --actor or from the BSKY_ACTOR environment
// variable. It is optional here so that a missing seed turns into our own
// configuration error (see config.rs) instead of a clap usage message.
// =============================================================================

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::graph::DEFAULT_API_BASE;

#[derive(Parser, Debug)]
#[command(
    name = "graph-harvest",
    version,
    about = "Crawl Bluesky follower/follow relationships into rotated batch files",
    long_about = "graph-harvest takes a seed actor, finds everyone it follows and everyone \
                  following it, and fetches both relationship lists for each of them in \
                  parallel. Edges are written as newline-delimited JSON batches, one \
                  directory per relationship type."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug logs (same as RUST_LOG=debug)
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover the seed's neighbours through the API and crawl them
    ///
    /// Example: BSKY_ACTOR=alice.bsky.social graph-harvest crawl --workers 20
    Crawl(CrawlArgs),

    /// Crawl the neighbours already recorded for the seed in --output-dir
    ///
    /// Example: graph-harvest expand --actor alice.bsky.social
    Expand(CrawlArgs),
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    /// Seed actor handle or DID
    #[arg(long, env = "BSKY_ACTOR")]
    pub actor: Option<String>,

    /// Directory holding the follows/ and followers/ batch directories
    #[arg(long, default_value = "data")]
    pub output_dir: PathBuf,

    /// Maximum number of parallel workers
    #[arg(long, default_value_t = 50)]
    pub workers: usize,

    /// Rotate a batch file once its estimated size reaches this many bytes
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub rotate_bytes: usize,

    /// Seconds to wait for the next result before giving up on the run
    #[arg(long, default_value_t = 60)]
    pub result_timeout: u64,

    /// Seconds without progress after which a worker counts as hung
    #[arg(long, default_value_t = 120)]
    pub inactive_after: u64,

    /// Seconds to wait for a live worker to finish on its own
    #[arg(long, default_value_t = 60)]
    pub completion_wait: u64,

    /// Seconds between asking a worker to stop and killing it
    #[arg(long, default_value_t = 5)]
    pub grace: u64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// XRPC base URL of the AppView to query
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Page size for follower/follow requests (1-100)
    #[arg(long, default_value_t = 100)]
    pub page_limit: u32,

    /// Print the run summary as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["graph-harvest", "crawl", "--actor", "alice"]).unwrap();
        let Commands::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert_eq!(args.actor.as_deref(), Some("alice"));
        assert_eq!(args.workers, 50);
        assert_eq!(args.result_timeout, 60);
        assert_eq!(args.page_limit, 100);
        assert!(!args.json);
    }

    #[test]
    fn test_expand_with_options() {
        let cli = Cli::try_parse_from([
            "graph-harvest",
            "expand",
            "--actor",
            "alice",
            "--workers",
            "4",
            "--output-dir",
            "/tmp/out",
            "--json",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Expand(args) = cli.command else {
            panic!("expected expand");
        };
        assert_eq!(args.workers, 4);
        assert_eq!(args.output_dir, PathBuf::from("/tmp/out"));
        assert!(args.json);
    }
}
