// src/crawl/supervisor.rs
// =============================================================================
// This module watches the worker pool and makes sure no worker can keep the
// run alive forever.
//
// Two phases:
// 1. While results are still flowing (watch): poll every worker. Finished
//    ones are collected, ones whose heartbeat is older than inactive_after
//    are escalated. The data path is never consulted.
// 2. Once the aggregator is done (reap): every remaining worker is either
//    collected, escalated for being idle, or given completion_wait to finish
//    before it is escalated.
//
// Escalation = graceful stop (trip the worker's CancellationToken), wait up
// to `grace`, then forced kill (abort the task). Workers are runtime tasks,
// so nothing outlives the process.
//
// Rust concepts:
// - JoinHandle: awaiting it waits for the task; abort() kills it
// - tokio::time::timeout: bounds every wait
// - tokio::time::interval: the polling clock of the watch phase
// =============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::worker::{Heartbeat, WorkerReport};

/// Thresholds for the terminate -> kill escalation.
///
/// `inactive_after` and `completion_wait` are independent: a worker idle for
/// `inactive_after` is stopped at once, a worker still producing edges gets
/// `completion_wait` to finish once the results are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorPolicy {
    pub inactive_after: Duration,
    pub completion_wait: Duration,
    pub grace: Duration,
}

impl SupervisorPolicy {
    // Heartbeats are checked a few times per inactivity window
    fn poll_every(&self) -> Duration {
        (self.inactive_after / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
    }
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            inactive_after: Duration::from_secs(120),
            completion_wait: Duration::from_secs(60),
            grace: Duration::from_secs(5),
        }
    }
}

/// A spawned worker as the supervisor sees it
pub struct WorkerHandle {
    pub id: usize,
    pub handle: JoinHandle<WorkerReport>,
    pub cancel: CancellationToken,
    pub heartbeat: Arc<Heartbeat>,
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Left its loop on its own (sentinel or closed queue)
    Completed(WorkerReport),
    /// Stopped after the graceful stop request
    Terminated { id: usize },
    /// Did not stop within the grace period and was aborted
    Killed { id: usize },
    /// Panicked
    Crashed { id: usize, reason: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Supervisor {
    policy: SupervisorPolicy,
}

impl Supervisor {
    pub fn new(policy: SupervisorPolicy) -> Self {
        Self { policy }
    }

    // Supervises the pool alongside the aggregator
    //
    // Parameters:
    //   workers: the spawned pool
    //   results_done: tripped once the aggregator has stopped consuming
    //
    // Returns: one WorkerExit per worker, in the order given. Idle workers
    // are stopped as soon as they are noticed; whatever is still running
    // when `results_done` fires goes through reap().
    pub async fn watch(
        &self,
        workers: Vec<WorkerHandle>,
        results_done: CancellationToken,
    ) -> Vec<WorkerExit> {
        let mut exits: Vec<Option<WorkerExit>> = workers.iter().map(|_| None).collect();
        let mut live: Vec<(usize, WorkerHandle)> = workers.into_iter().enumerate().collect();

        let mut ticker = interval(self.policy.poll_every());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !live.is_empty() {
            tokio::select! {
                _ = results_done.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut still_running = Vec::with_capacity(live.len());
            for (slot, worker) in live {
                if worker.handle.is_finished() {
                    exits[slot] = Some(self.settle(worker).await);
                } else if worker.heartbeat.idle_for() >= self.policy.inactive_after {
                    exits[slot] = Some(self.settle(worker).await);
                } else {
                    still_running.push((slot, worker));
                }
            }
            live = still_running;
        }

        let (slots, remaining): (Vec<usize>, Vec<WorkerHandle>) = live.into_iter().unzip();
        for (slot, exit) in slots.into_iter().zip(self.reap(remaining).await) {
            exits[slot] = Some(exit);
        }

        exits.into_iter().flatten().collect()
    }

    // Joins every worker, escalating on the ones that do not finish
    //
    // Returns: one WorkerExit per worker, in the order given
    pub async fn reap(&self, workers: Vec<WorkerHandle>) -> Vec<WorkerExit> {
        let mut exits = Vec::with_capacity(workers.len());
        for worker in workers {
            exits.push(self.reap_one(worker).await);
        }
        exits
    }

    // Collects a finished worker, or stops an idle one right away
    async fn settle(&self, worker: WorkerHandle) -> WorkerExit {
        let WorkerHandle {
            id,
            handle,
            cancel,
            heartbeat,
        } = worker;

        let exit = if handle.is_finished() {
            classify(id, handle.await)
        } else {
            warn!(
                "Worker {} inactive for {:.1}s, requesting stop",
                id,
                heartbeat.idle_for().as_secs_f64()
            );
            self.escalate(id, handle, cancel).await
        };
        log_exit(&exit);
        exit
    }

    async fn reap_one(&self, worker: WorkerHandle) -> WorkerExit {
        if worker.handle.is_finished()
            || worker.heartbeat.idle_for() >= self.policy.inactive_after
        {
            return self.settle(worker).await;
        }

        let WorkerHandle {
            id, mut handle, cancel, ..
        } = worker;

        let exit = match timeout(self.policy.completion_wait, &mut handle).await {
            Ok(joined) => classify(id, joined),
            Err(_) => {
                warn!(
                    "Worker {} still running after {:.1}s, requesting stop",
                    id,
                    self.policy.completion_wait.as_secs_f64()
                );
                self.escalate(id, handle, cancel).await
            }
        };
        log_exit(&exit);
        exit
    }

    // terminate -> grace -> kill
    async fn escalate(
        &self,
        id: usize,
        mut handle: JoinHandle<WorkerReport>,
        cancel: CancellationToken,
    ) -> WorkerExit {
        cancel.cancel();

        match timeout(self.policy.grace, &mut handle).await {
            Ok(joined) => classify(id, joined),
            Err(_) => {
                handle.abort();
                // the JoinError here is the cancellation we just caused
                let _ = handle.await;
                WorkerExit::Killed { id }
            }
        }
    }
}

fn classify(id: usize, joined: Result<WorkerReport, JoinError>) -> WorkerExit {
    match joined {
        Ok(report) if report.cancelled => WorkerExit::Terminated { id },
        Ok(report) => WorkerExit::Completed(report),
        Err(e) if e.is_cancelled() => WorkerExit::Killed { id },
        Err(e) => WorkerExit::Crashed {
            id,
            reason: e.to_string(),
        },
    }
}

fn log_exit(exit: &WorkerExit) {
    match exit {
        WorkerExit::Completed(report) => {
            debug!(worker = report.id, processed = report.processed, "worker joined")
        }
        WorkerExit::Terminated { id } => warn!("Worker {} terminated", id),
        WorkerExit::Killed { id } => warn!("Worker {} killed after grace period", id),
        WorkerExit::Crashed { id, reason } => error!("Worker {} crashed: {}", id, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(inactive_ms: u64, wait_ms: u64, grace_ms: u64) -> SupervisorPolicy {
        SupervisorPolicy {
            inactive_after: Duration::from_millis(inactive_ms),
            completion_wait: Duration::from_millis(wait_ms),
            grace: Duration::from_millis(grace_ms),
        }
    }

    // A worker that honours its token, optionally after doing "work" first
    fn cooperative(id: usize, work: Duration) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let heartbeat = Arc::new(Heartbeat::new());
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => WorkerReport { id, processed: 0, cancelled: true },
                _ = tokio::time::sleep(work) => WorkerReport { id, processed: 1, cancelled: false },
            }
        });
        WorkerHandle { id, handle, cancel, heartbeat }
    }

    // A worker that ignores its token
    fn stubborn(id: usize) -> WorkerHandle {
        let handle = tokio::spawn(async move {
            std::future::pending::<()>().await;
            WorkerReport { id, processed: 0, cancelled: false }
        });
        WorkerHandle {
            id,
            handle,
            cancel: CancellationToken::new(),
            heartbeat: Arc::new(Heartbeat::new()),
        }
    }

    #[tokio::test]
    async fn test_finished_worker_is_completed() {
        let worker = cooperative(1, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let exits = Supervisor::new(policy(10_000, 1_000, 100)).reap(vec![worker]).await;
        assert_eq!(
            exits,
            vec![WorkerExit::Completed(WorkerReport { id: 1, processed: 1, cancelled: false })]
        );
    }

    #[tokio::test]
    async fn test_slow_worker_gets_completion_wait() {
        let worker = cooperative(2, Duration::from_millis(50));
        worker.heartbeat.touch();

        let exits = Supervisor::new(policy(10_000, 2_000, 100)).reap(vec![worker]).await;
        assert!(matches!(exits[0], WorkerExit::Completed(_)));
    }

    #[tokio::test]
    async fn test_idle_worker_is_terminated() {
        let worker = cooperative(3, Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let exits = Supervisor::new(policy(10, 10_000, 1_000)).reap(vec![worker]).await;
        assert_eq!(exits, vec![WorkerExit::Terminated { id: 3 }]);
    }

    #[tokio::test]
    async fn test_overdue_worker_is_terminated() {
        let worker = cooperative(4, Duration::from_secs(3600));
        worker.heartbeat.touch();

        let exits = Supervisor::new(policy(10_000, 30, 1_000)).reap(vec![worker]).await;
        assert_eq!(exits, vec![WorkerExit::Terminated { id: 4 }]);
    }

    #[tokio::test]
    async fn test_stubborn_worker_is_killed() {
        let worker = stubborn(5);

        let exits = Supervisor::new(policy(0, 10, 30)).reap(vec![worker]).await;
        assert_eq!(exits, vec![WorkerExit::Killed { id: 5 }]);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_crashed() {
        let handle = tokio::spawn(async move {
            if true {
                panic!("worker blew up");
            }
            WorkerReport { id: 6, processed: 0, cancelled: false }
        });
        let worker = WorkerHandle {
            id: 6,
            handle,
            cancel: CancellationToken::new(),
            heartbeat: Arc::new(Heartbeat::new()),
        };

        let exits = Supervisor::new(policy(10_000, 1_000, 100)).reap(vec![worker]).await;
        assert!(matches!(exits[0], WorkerExit::Crashed { id: 6, .. }));
    }

    #[tokio::test]
    async fn test_watch_stops_idle_worker_while_results_flow() {
        let busy = cooperative(1, Duration::from_millis(40));
        let idle = cooperative(2, Duration::from_secs(3600));
        let results_done = CancellationToken::new();

        // keep the busy worker's heartbeat fresh, the idle one never beats
        let beat = Arc::clone(&busy.heartbeat);
        let pulse = tokio::spawn(async move {
            for _ in 0..10 {
                beat.touch();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let exits = timeout(
            Duration::from_secs(5),
            Supervisor::new(policy(30, 10_000, 1_000)).watch(vec![busy, idle], results_done.clone()),
        )
        .await
        .unwrap();
        pulse.await.unwrap();

        // everything settled without the aggregator ever finishing
        assert!(!results_done.is_cancelled());
        assert!(matches!(exits[0], WorkerExit::Completed(_)));
        assert_eq!(exits[1], WorkerExit::Terminated { id: 2 });
    }

    #[tokio::test]
    async fn test_watch_hands_running_workers_to_reap() {
        let slow = cooperative(3, Duration::from_secs(3600));
        slow.heartbeat.touch();
        let results_done = CancellationToken::new();
        results_done.cancel();

        let exits = Supervisor::new(policy(10_000, 20, 1_000))
            .watch(vec![slow], results_done)
            .await;
        assert_eq!(exits, vec![WorkerExit::Terminated { id: 3 }]);
    }
}
