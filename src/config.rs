// src/config.rs
// =============================================================================
// Validated run configuration.
//
// CrawlArgs (cli.rs) is whatever the user typed; CrawlConfig is what the
// pipeline runs with. Conversion checks the seed actor and the numeric
// limits, and turns seconds into Durations.
// =============================================================================

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::CrawlArgs;
use crate::crawl::SupervisorPolicy;
use crate::error::CrawlError;
use crate::graph::{is_crawlable, Actor, MAX_PAGE_LIMIT};

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub seed: Actor,
    pub output_dir: PathBuf,
    /// Upper bound on the worker pool; the real size is min(cap, frontier)
    pub worker_cap: usize,
    pub rotate_bytes: usize,
    /// Longest the aggregator waits for one result before declaring a stall
    pub result_timeout: Duration,
    pub supervisor: SupervisorPolicy,
    pub request_timeout: Duration,
    pub api_base: String,
    pub page_limit: u32,
}

impl CrawlConfig {
    /// CLI defaults for a given seed
    #[cfg(test)]
    pub fn for_seed(seed: &str, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            seed: seed.to_string(),
            output_dir: output_dir.into(),
            worker_cap: 50,
            rotate_bytes: 8 * 1024 * 1024,
            result_timeout: Duration::from_secs(60),
            supervisor: SupervisorPolicy::default(),
            request_timeout: Duration::from_secs(30),
            api_base: crate::graph::DEFAULT_API_BASE.to_string(),
            page_limit: MAX_PAGE_LIMIT,
        }
    }
}

impl TryFrom<CrawlArgs> for CrawlConfig {
    type Error = CrawlError;

    fn try_from(args: CrawlArgs) -> Result<Self, Self::Error> {
        let seed = args
            .actor
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or(CrawlError::MissingSeed)?;

        if !is_crawlable(&seed) {
            return Err(CrawlError::InvalidSeed(seed));
        }
        if args.workers == 0 {
            return Err(CrawlError::InvalidConfig("--workers must be at least 1".into()));
        }
        if args.rotate_bytes == 0 {
            return Err(CrawlError::InvalidConfig("--rotate-bytes must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&args.page_limit) {
            return Err(CrawlError::InvalidConfig(format!(
                "--page-limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        Ok(Self {
            seed,
            output_dir: args.output_dir,
            worker_cap: args.workers,
            rotate_bytes: args.rotate_bytes,
            result_timeout: Duration::from_secs(args.result_timeout),
            supervisor: SupervisorPolicy {
                inactive_after: Duration::from_secs(args.inactive_after),
                completion_wait: Duration::from_secs(args.completion_wait),
                grace: Duration::from_secs(args.grace),
            },
            request_timeout: Duration::from_secs(args.request_timeout),
            api_base: args.api_base,
            page_limit: args.page_limit,
        })
    }
}
