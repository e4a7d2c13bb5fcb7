// src/crawl/discover.rs
// =============================================================================
// This module computes the crawl frontier: the set of actors one hop away
// from the seed, plus the seed itself.
//
// Two ways to get it:
// - discover_frontier: walk the seed's follows and followers through the API
// - frontier_from_provider: reuse handles saved by an earlier run
//
// Either way the result is a HashSet, so duplicates collapse and
// "handle.invalid" never gets in.
// =============================================================================

use futures::{future, StreamExt};
use std::collections::HashSet;
use tracing::info;

use crate::error::CrawlError;
use crate::graph::{is_crawlable, Actor, GraphApi, Relation, RelationWalk};
use crate::sink::HandleProvider;

// Walks both relations of the seed and collects every crawlable handle
//
// Parameters:
//   api: the shared graph client
//   seed: the root actor
//   page_limit: page size for the walks
//
// Returns: the frontier (never contains INVALID_HANDLE, always the seed)
//
// A walk that fails part way still contributes the handles it already
// produced; the failure itself is logged by the walk.
pub async fn discover_frontier(api: &dyn GraphApi, seed: &str, page_limit: u32) -> HashSet<Actor> {
    let mut frontier = HashSet::new();

    for relation in Relation::ALL {
        let handles: Vec<Actor> = RelationWalk::new(api, seed, relation)
            .with_limit(page_limit)
            .into_stream()
            .filter_map(|edge| {
                future::ready(
                    edge.related_handle()
                        .filter(|h| is_crawlable(h))
                        .map(str::to_string),
                )
            })
            .collect()
            .await;

        info!(
            seed,
            relation = relation.batch_name(),
            count = handles.len(),
            "collected {} for root actor",
            relation.batch_name()
        );
        frontier.extend(handles);
    }

    if is_crawlable(seed) {
        frontier.insert(seed.to_string());
    }

    info!("Found {} actors to process", frontier.len());
    frontier
}

// Builds the frontier from handles already recorded for the seed
//
// Parameters:
//   provider: where earlier runs stored their edges
//   seed: the root actor used as the filter
pub async fn frontier_from_provider(
    provider: &dyn HandleProvider,
    seed: &str,
) -> Result<HashSet<Actor>, CrawlError> {
    let mut frontier: HashSet<Actor> = provider
        .handles_for(seed)
        .await?
        .into_iter()
        .filter(|h| is_crawlable(h))
        .collect();

    if is_crawlable(seed) {
        frontier.insert(seed.to_string());
    }

    info!("Found {} previously observed actors for {}", frontier.len(), seed);
    Ok(frontier)
}
