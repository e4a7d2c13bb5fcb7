// src/graph/paginate.rs
// =============================================================================
// This module turns page-at-a-time API calls into a lazy sequence of edges.
//
// How it works:
// 1. The first call goes out with no cursor
// 2. Every edge in the page is handed out one at a time
// 3. When the page runs dry, the next call goes out with the page's cursor
// 4. A page without a cursor is the last one
//
// Errors end the walk early. Edges already handed out stay handed out; the
// error is logged and kept on the walk so callers that care can look at it.
// A walk never goes backwards: once it is done, it stays done.
//
// Rust concepts:
// - VecDeque: buffer of edges from the current page
// - Lifetimes: the walk borrows the client and the actor name
// - Streams: into_stream() adapts the walk for StreamExt combinators
// =============================================================================

use chrono::Utc;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use tracing::{debug, error};

use super::client::{GraphApi, PageRequest, MAX_PAGE_LIMIT};
use super::model::{Edge, Relation};
use crate::error::ApiError;

// Where the walk is in the cursor chain
#[derive(Debug)]
enum PageCursor {
    /// Nothing fetched yet
    Start,
    /// More pages exist, starting at this cursor
    Next(String),
    /// Last page seen, or the walk failed
    Done,
}

/// A single pass over one actor's followers or follows.
pub struct RelationWalk<'a> {
    api: &'a dyn GraphApi,
    actor: &'a str,
    relation: Relation,
    limit: u32,
    state: PageCursor,
    buffered: VecDeque<Edge>,
    pages: usize,
    yielded: usize,
    failure: Option<ApiError>,
}

impl<'a> RelationWalk<'a> {
    pub fn new(api: &'a dyn GraphApi, actor: &'a str, relation: Relation) -> Self {
        Self {
            api,
            actor,
            relation,
            limit: MAX_PAGE_LIMIT,
            state: PageCursor::Start,
            buffered: VecDeque::new(),
            pages: 0,
            yielded: 0,
            failure: None,
        }
    }

    /// Overrides the page size (clamped to 1..=100)
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    // Returns the next edge, fetching another page when the buffer is empty
    //
    // Returns: Some(edge) while edges remain, None once the walk has ended
    // (last page reached or a call failed). None is permanent.
    pub async fn next_edge(&mut self) -> Option<Edge> {
        loop {
            if let Some(edge) = self.buffered.pop_front() {
                self.yielded += 1;
                return Some(edge);
            }

            let cursor = match std::mem::replace(&mut self.state, PageCursor::Done) {
                PageCursor::Start => None,
                PageCursor::Next(cursor) => Some(cursor),
                PageCursor::Done => return None,
            };

            let request = PageRequest {
                actor: self.actor,
                relation: self.relation,
                limit: self.limit,
                cursor: cursor.as_deref(),
            };

            match self.api.fetch_page(request).await {
                Ok(page) => {
                    self.pages += 1;
                    let observed_at = Utc::now();
                    let (actor, relation) = (self.actor, self.relation);
                    self.buffered.extend(page.items.into_iter().map(|payload| Edge {
                        source_actor: actor.to_string(),
                        relation,
                        observed_at,
                        payload,
                    }));

                    match page.cursor.filter(|c| !c.is_empty()) {
                        Some(next) => self.state = PageCursor::Next(next),
                        None => debug!(
                            actor = self.actor,
                            relation = self.relation.batch_name(),
                            total = self.yielded + self.buffered.len(),
                            "no more pages"
                        ),
                    }
                }
                Err(e) => {
                    error!(
                        actor = self.actor,
                        relation = self.relation.batch_name(),
                        "error getting {} for {}: {}",
                        self.relation.batch_name(),
                        self.actor,
                        e
                    );
                    self.failure = Some(e);
                    return None;
                }
            }
        }
    }

    /// Drains the walk. Returns every edge it produced plus the error that
    /// cut it short, if any.
    #[cfg(test)]
    pub async fn collect_all(mut self) -> (Vec<Edge>, Option<ApiError>) {
        let mut edges = Vec::new();
        while let Some(edge) = self.next_edge().await {
            edges.push(edge);
        }
        (edges, self.failure)
    }

    /// Adapts the walk into a Stream of edges (errors stay swallowed)
    pub fn into_stream(self) -> impl Stream<Item = Edge> + Send + 'a {
        stream::unfold(self, |mut walk| async move {
            walk.next_edge().await.map(|edge| (edge, walk))
        })
    }

    /// Consumes the walk, returning the error that ended it early
    pub fn into_failure(self) -> Option<ApiError> {
        self.failure
    }

    /// Number of pages fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }
}
