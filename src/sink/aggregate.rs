// src/sink/aggregate.rs
// =============================================================================
// This module is the single consumer of the result queue.
//
// For every CrawlResult it:
// - updates the processed count, the average duration and the ETA
// - on success, stages both edge lists in the follows and followers batches
//   (which rotate files on their own) and commits them together
// - on failure, or when saving fails, counts the actor as failed; a failed
//   save leaves none of the actor's records behind
//
// It stops when it has seen one result per dispatched task, or when no result
// arrives within the wait bound (a stall). Either way the batches are drained
// before returning.
// =============================================================================

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::batch::RelationBatch;
use crate::crawl::{ActorEdges, CrawlResult, ProgressTracker};
use crate::error::CrawlError;
use crate::graph::Relation;

/// Totals from one aggregation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateReport {
    pub successful: usize,
    pub failed: usize,
    pub processed: usize,
    /// True when the loop gave up waiting for results
    pub stalled: bool,
    pub files: Vec<PathBuf>,
}

pub struct Aggregator {
    expected: usize,
    wait: Duration,
    follows: RelationBatch,
    followers: RelationBatch,
    progress: ProgressTracker,
    successful: usize,
    failed: usize,
}

impl Aggregator {
    // Opens both batch directories under `output_dir`
    //
    // Parameters:
    //   expected: number of dispatched tasks
    //   rotate_bytes: batch rotation threshold
    //   wait: longest wait for a single result
    pub async fn open(
        output_dir: &Path,
        expected: usize,
        rotate_bytes: usize,
        wait: Duration,
    ) -> Result<Self, CrawlError> {
        Ok(Self {
            expected,
            wait,
            follows: RelationBatch::open(output_dir, Relation::Following, rotate_bytes).await?,
            followers: RelationBatch::open(output_dir, Relation::Follower, rotate_bytes).await?,
            progress: ProgressTracker::new(expected),
            successful: 0,
            failed: 0,
        })
    }

    // Consumes results until every task is accounted for or the queue stalls
    pub async fn run(mut self, results: &mut mpsc::UnboundedReceiver<CrawlResult>) -> AggregateReport {
        info!("Starting to save results for {} actors", self.expected);
        let started = Instant::now();
        let mut stalled = false;

        while self.progress.processed() < self.expected {
            match timeout(self.wait, results.recv()).await {
                Ok(Some(result)) => self.accept(result).await,
                Ok(None) => {
                    warn!(
                        "Result queue closed after {}/{} results",
                        self.progress.processed(),
                        self.expected
                    );
                    stalled = true;
                    break;
                }
                Err(_) => {
                    error!(
                        "Timeout waiting for results: nothing arrived in {:.0}s ({}/{} processed)",
                        self.wait.as_secs_f64(),
                        self.progress.processed(),
                        self.expected
                    );
                    stalled = true;
                    break;
                }
            }
        }

        for batch in [&mut self.follows, &mut self.followers] {
            if let Err(e) = batch.finish().await {
                error!("Could not write final {} batch: {}", batch.relation().batch_name(), e);
            }
        }

        info!(
            "Total processing time: {:.1} minutes",
            started.elapsed().as_secs_f64() / 60.0
        );

        let mut files = self.follows.files_written().to_vec();
        files.extend_from_slice(self.followers.files_written());

        AggregateReport {
            successful: self.successful,
            failed: self.failed,
            processed: self.progress.processed(),
            stalled,
            files,
        }
    }

    async fn accept(&mut self, result: CrawlResult) {
        self.progress.record(result.duration);
        let progress = self.progress.label();
        let CrawlResult {
            actor,
            outcome,
            duration,
        } = result;

        match outcome {
            Ok(edges) => match self.persist(edges).await {
                Ok(()) => {
                    self.successful += 1;
                    info!(
                        "{} Saved data for {} (took {:.1}s, avg {:.1}s, ETA {:.1}min)",
                        progress,
                        actor,
                        duration.as_secs_f64(),
                        self.progress.average().as_secs_f64(),
                        self.progress.eta().as_secs_f64() / 60.0
                    );
                }
                Err(e) => {
                    self.failed += 1;
                    error!("{} Error saving data for {}: {}", progress, actor, e);
                }
            },
            Err(e) => {
                self.failed += 1;
                error!("{} Failed to process {}: {}", progress, actor, e);
            }
        }
    }

    // Saves one actor's edges to both batches, all or nothing: both lists are
    // validated first, then staged, and any failure while writing rolls both
    // batches back to where they were before this actor
    async fn persist(&mut self, edges: ActorEdges) -> Result<(), CrawlError> {
        let follows = self.follows.encode(&edges.following)?;
        let followers = self.followers.encode(&edges.followers)?;

        let follows_mark = self.follows.stage(follows);
        let followers_mark = self.followers.stage(followers);

        let written = match self.follows.write_full().await {
            Ok(()) => self.followers.write_full().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                self.follows.commit();
                self.followers.commit();
                Ok(())
            }
            Err(e) => {
                self.follows.rollback(follows_mark).await;
                self.followers.rollback(followers_mark).await;
                Err(e)
            }
        }
    }
}
