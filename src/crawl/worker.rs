// src/crawl/worker.rs
// =============================================================================
// This module is one member of the worker pool.
//
// Worker loop:
// 1. Pop the next item from the shared task queue
// 2. Shutdown sentinel (or closed queue) -> exit
// 3. Otherwise fetch follows, then followers, for the actor
// 4. Wrap the outcome as a CrawlResult and send it to the aggregator
// 5. Repeat
//
// A failed actor is just a CrawlResult with an error inside; it never stops
// the worker. The only way to stop a worker early is its CancellationToken,
// which the supervisor trips. A cancelled worker drops whatever actor it was
// on without sending a result.
//
// Every worker also stamps a Heartbeat whenever it makes progress so the
// supervisor can tell a slow worker from a hung one.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::format_progress;
use super::queue::{next_task, TaskItem, TaskQueue};
use crate::error::ApiError;
use crate::graph::{Actor, Edge, GraphApi, Relation, RelationWalk};

/// Both relation lists for one actor
#[derive(Debug, Default)]
pub struct ActorEdges {
    pub following: Vec<Edge>,
    pub followers: Vec<Edge>,
}

/// Outcome of processing one task
#[derive(Debug)]
pub struct CrawlResult {
    pub actor: Actor,
    pub outcome: Result<ActorEdges, ApiError>,
    pub duration: Duration,
}

/// Last time a worker did something, readable from other tasks
#[derive(Debug)]
pub struct Heartbeat {
    epoch: Instant,
    last_millis: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_millis.store(now, Ordering::Relaxed);
    }

    /// Time since the last touch (or since creation)
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one worker needs, handed over when it is spawned
pub struct WorkerContext {
    pub id: usize,
    pub api: Arc<dyn GraphApi>,
    pub queue: TaskQueue,
    pub results: mpsc::UnboundedSender<CrawlResult>,
    pub heartbeat: Arc<Heartbeat>,
    pub cancel: CancellationToken,
    pub page_limit: u32,
    /// Rough number of tasks this worker can expect, for progress logs
    pub expected_share: usize,
}

/// What a worker reports when its loop ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub processed: usize,
    /// True when the loop ended because of cancellation
    pub cancelled: bool,
}

// Fetches follows then followers for one actor
//
// Parameters:
//   api: shared graph client
//   actor: whose relations to fetch
//   page_limit: page size for both walks
//   heartbeat: touched for every edge received
//
// Returns: a CrawlResult; if either walk ends with an error the result is a
// failure and carries no edges (follows are not kept without followers)
pub async fn crawl_actor(
    api: &dyn GraphApi,
    actor: &str,
    page_limit: u32,
    heartbeat: &Heartbeat,
) -> CrawlResult {
    let start = Instant::now();
    let mut edges = ActorEdges::default();

    for relation in Relation::ALL {
        debug!("Collecting {} for {}", relation.batch_name(), actor);
        let mut walk = RelationWalk::new(api, actor, relation).with_limit(page_limit);
        let mut collected = Vec::new();
        while let Some(edge) = walk.next_edge().await {
            heartbeat.touch();
            collected.push(edge);
        }

        debug!(
            actor,
            relation = relation.batch_name(),
            pages = walk.pages_fetched(),
            edges = collected.len(),
            "walk finished"
        );
        if let Some(error) = walk.into_failure() {
            return CrawlResult {
                actor: actor.to_string(),
                outcome: Err(error),
                duration: start.elapsed(),
            };
        }

        match relation {
            Relation::Following => edges.following = collected,
            Relation::Follower => edges.followers = collected,
        }
    }

    CrawlResult {
        actor: actor.to_string(),
        outcome: Ok(edges),
        duration: start.elapsed(),
    }
}

// Runs the worker loop until a sentinel, a closed queue or cancellation
pub async fn run_worker(ctx: WorkerContext) -> WorkerReport {
    let mut processed = 0;
    let mut cancelled = false;
    ctx.heartbeat.touch();

    loop {
        let item = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                cancelled = true;
                break;
            }
            item = next_task(&ctx.queue) => item,
        };
        ctx.heartbeat.touch();

        let actor = match item {
            Some(TaskItem::Crawl(actor)) => actor,
            Some(TaskItem::Shutdown) | None => break,
        };

        processed += 1;
        info!(
            "Worker {} {}: Processing {}",
            ctx.id,
            format_progress(processed, ctx.expected_share.max(processed)),
            actor
        );

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                warn!("Worker {} stopped while processing {}", ctx.id, actor);
                cancelled = true;
                break;
            }
            result = crawl_actor(ctx.api.as_ref(), &actor, ctx.page_limit, &ctx.heartbeat) => result,
        };

        if ctx.results.send(result).is_err() {
            warn!("Worker {}: result queue closed, exiting", ctx.id);
            break;
        }
        ctx.heartbeat.touch();
    }

    debug!(worker = ctx.id, processed, cancelled, "worker finished");
    WorkerReport {
        id: ctx.id,
        processed,
        cancelled,
    }
}
