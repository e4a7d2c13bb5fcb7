// src/crawl/queue.rs
// =============================================================================
// This module loads the frontier into the task queue workers pull from.
//
// How it works:
// 1. Every frontier actor becomes one TaskItem::Crawl, in FIFO order
// 2. Then exactly one TaskItem::Shutdown per worker is appended
// 3. Each worker stops when it pops a Shutdown, so the pool winds down on its
//    own once the real work is gone
//
// The pool never has more workers than tasks: pool_size = min(cap, tasks).
//
// Rust concepts:
// - mpsc::unbounded_channel: tokio's multi-producer, single-consumer queue
// - Arc<Mutex<Receiver>>: lets several workers share the one receiver
// =============================================================================

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::graph::{is_crawlable, Actor};

/// One entry in the task queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskItem {
    /// Fetch both relation lists for this actor
    Crawl(Actor),
    /// Poison pill: the worker that pops it exits its loop
    Shutdown,
}

/// Shared consumer side of the task queue
pub type TaskQueue = Arc<Mutex<mpsc::UnboundedReceiver<TaskItem>>>;

/// A loaded queue plus the numbers the rest of the pipeline needs
#[derive(Debug)]
pub struct Dispatch {
    pub queue: TaskQueue,
    pub pool_size: usize,
    pub task_count: usize,
}

/// Number of workers to start: never more than there are tasks
pub fn pool_size(cap: usize, frontier_size: usize) -> usize {
    cap.min(frontier_size)
}

// Loads every actor into a fresh queue, followed by the shutdown sentinels
//
// Parameters:
//   frontier: actors to crawl, in the order they should be handed out
//   cap: configured maximum number of workers
//
// Uncrawlable handles are skipped here as a last line; discovery already
// drops them.
pub fn dispatch(frontier: Vec<Actor>, cap: usize) -> Dispatch {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut task_count = 0;
    for actor in frontier.into_iter().filter(|a| is_crawlable(a)) {
        // rx is alive in this scope, so send cannot fail
        let _ = tx.send(TaskItem::Crawl(actor));
        task_count += 1;
    }

    let pool_size = pool_size(cap, task_count);
    for _ in 0..pool_size {
        let _ = tx.send(TaskItem::Shutdown);
    }

    debug!(task_count, pool_size, "task queue loaded");

    Dispatch {
        queue: Arc::new(Mutex::new(rx)),
        pool_size,
        task_count,
    }
}

/// Pops the next item; None once the queue is drained and closed
pub async fn next_task(queue: &TaskQueue) -> Option<TaskItem> {
    let mut rx = queue.lock().await;
    rx.recv().await
}
