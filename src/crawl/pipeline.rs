// src/crawl/pipeline.rs
// =============================================================================
// This module wires one crawl round together.
//
// 1. Load the frontier into the task queue (queue.rs)
// 2. Spawn min(cap, frontier) workers (worker.rs)
// 3. Run the aggregator on the result queue until it has every result or
//    stalls (sink/aggregate.rs), while the supervisor watches the workers'
//    heartbeats (supervisor.rs)
// 4. Once the results are in, the supervisor joins, stops or kills whatever
//    is still running
// 5. Summarise
// =============================================================================

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::queue::{dispatch, Dispatch};
use super::supervisor::{Supervisor, WorkerExit, WorkerHandle};
use super::worker::{run_worker, Heartbeat, WorkerContext};
use crate::config::CrawlConfig;
use crate::error::CrawlError;
use crate::graph::{is_crawlable, Actor, GraphApi};
use crate::sink::Aggregator;

/// Everything a finished run reports
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub seed: Actor,
    pub frontier_size: usize,
    pub pool_size: usize,
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    /// The aggregator gave up waiting for results
    pub stalled: bool,
    pub elapsed_secs: f64,
    pub files: Vec<PathBuf>,
    pub workers_completed: usize,
    pub workers_terminated: usize,
    pub workers_killed: usize,
    pub workers_crashed: usize,
}

impl RunSummary {
    /// 0 when every actor was saved, 1 when anything failed or stalled
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 || self.stalled {
            1
        } else {
            0
        }
    }

    fn count_exits(&mut self, exits: &[WorkerExit]) {
        for exit in exits {
            match exit {
                WorkerExit::Completed(_) => self.workers_completed += 1,
                WorkerExit::Terminated { .. } => self.workers_terminated += 1,
                WorkerExit::Killed { .. } => self.workers_killed += 1,
                WorkerExit::Crashed { .. } => self.workers_crashed += 1,
            }
        }
    }
}

// Crawls every actor in the frontier and writes the results
//
// Parameters:
//   api: the graph client, shared by every worker
//   frontier: actors to crawl (the sentinel handle is dropped if present)
//   config: pool size cap, output directory, timeouts
//
// Returns: the run summary. Errors only when the output directories cannot
// be prepared; per-actor failures are counted in the summary instead.
pub async fn run_pipeline(
    api: Arc<dyn GraphApi>,
    frontier: HashSet<Actor>,
    config: &CrawlConfig,
) -> Result<RunSummary, CrawlError> {
    let start = Instant::now();
    let mut actors: Vec<Actor> = frontier.into_iter().filter(|a| is_crawlable(a)).collect();
    actors.sort();

    let mut summary = RunSummary {
        seed: config.seed.clone(),
        frontier_size: actors.len(),
        ..Default::default()
    };

    if actors.is_empty() {
        info!("No actors to process");
        return Ok(summary);
    }

    let aggregator = Aggregator::open(
        &config.output_dir,
        actors.len(),
        config.rotate_bytes,
        config.result_timeout,
    )
    .await?;

    let Dispatch {
        queue,
        pool_size,
        task_count,
    } = dispatch(actors, config.worker_cap);
    summary.pool_size = pool_size;
    summary.total = task_count;

    info!(
        "Starting processing of {} actors with {} workers",
        task_count, pool_size
    );

    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    let expected_share = task_count.div_ceil(pool_size.max(1));

    let workers: Vec<WorkerHandle> = (1..=pool_size)
        .map(|id| {
            let cancel = CancellationToken::new();
            let heartbeat = Arc::new(Heartbeat::new());
            let handle = tokio::spawn(run_worker(WorkerContext {
                id,
                api: Arc::clone(&api),
                queue: Arc::clone(&queue),
                results: results_tx.clone(),
                heartbeat: Arc::clone(&heartbeat),
                cancel: cancel.clone(),
                page_limit: config.page_limit,
                expected_share,
            }));
            WorkerHandle {
                id,
                handle,
                cancel,
                heartbeat,
            }
        })
        .collect();

    // only workers hold senders now, so a dead pool closes the queue
    drop(results_tx);

    // the supervisor watches the pool while the aggregator consumes results
    let results_done = CancellationToken::new();
    let supervisor = Supervisor::new(config.supervisor);
    let (report, exits) = tokio::join!(
        async {
            let report = aggregator.run(&mut results_rx).await;
            results_done.cancel();
            report
        },
        supervisor.watch(workers, results_done.clone()),
    );

    summary.successful = report.successful;
    summary.failed = report.failed;
    summary.stalled = report.stalled;
    summary.files = report.files;
    summary.count_exits(&exits);
    summary.elapsed_secs = start.elapsed().as_secs_f64();

    if summary.stalled {
        warn!(
            "Result stream timed out: {} of {} actors were never saved",
            task_count.saturating_sub(report.processed),
            task_count
        );
    }
    info!(
        "Processing complete in {:.1} minutes: {} successful, {} failed, {} total",
        summary.elapsed_secs / 60.0,
        summary.successful,
        summary.failed,
        summary.total
    );
    if summary.failed > 0 {
        warn!("Failed to process {} actors", summary.failed);
    }

    Ok(summary)
}
