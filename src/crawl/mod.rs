// src/crawl/mod.rs
// =============================================================================
// This module runs the crawl itself.
//
// Pieces, in the order a run uses them:
// - discover: seed actor -> frontier
// - queue: frontier -> task queue with one shutdown sentinel per worker
// - worker: pops tasks, fetches both relation lists, sends results
// - supervisor: joins workers, stopping or killing the ones that hang
// - pipeline: wires all of the above to the aggregator in sink/
// - progress: "[n/m - p%]" labels and the ETA
// =============================================================================

mod discover;
mod pipeline;
mod progress;
mod queue;
mod supervisor;
mod worker;

pub use discover::{discover_frontier, frontier_from_provider};
pub use pipeline::{run_pipeline, RunSummary};
pub use progress::ProgressTracker;
pub use supervisor::SupervisorPolicy;
pub use worker::{ActorEdges, CrawlResult};

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. Why two queues?
//    - The task queue carries actors from the dispatcher to the workers
//    - The result queue carries CrawlResults from the workers to the one
//      aggregator
//    - Neither side shares anything else, so no locks around the data itself
//
// 2. What is a poison pill?
//    - A special queue item (TaskItem::Shutdown) that means "stop now"
//    - One per worker, queued after all real work
//    - Each worker eats exactly one and exits
//
// 3. What is a CancellationToken?
//    - A cheap, cloneable flag from tokio-util
//    - The supervisor calls cancel(), the worker awaits cancelled()
//    - tokio::select! lets a worker wait on its task and the token at once
// -----------------------------------------------------------------------------
