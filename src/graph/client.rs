// src/graph/client.rs
// =============================================================================
// This module talks to the Bluesky social-graph API.
//
// Endpoints used (both public, no authentication needed):
// - app.bsky.graph.getFollowers: accounts following an actor
// - app.bsky.graph.getFollows:   accounts an actor follows
//
// Both take ?actor=...&limit=...&cursor=... and answer with
//   { "followers": [...], "cursor": "..." }   (or "follows": [...])
//
// The rest of the crawler only sees the GraphApi trait, so tests can swap in
// an in-memory graph and the HTTP client is built once in main.rs and shared.
//
// Rust concepts:
// - Traits: a shared interface (GraphApi) with several implementations
// - async-trait: lets us put async fns in a trait and use it as dyn GraphApi
// =============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::model::{Page, ProfilePayload, Relation};
use crate::error::ApiError;

/// Public AppView endpoint, no login required
pub const DEFAULT_API_BASE: &str = "https://public.api.bsky.app/xrpc/";

/// Largest page size the graph endpoints accept
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Parameters for one page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub actor: &'a str,
    pub relation: Relation,
    pub limit: u32,
    /// None on the first call, then the cursor from the previous page
    pub cursor: Option<&'a str>,
}

/// Anything that can return one page of followers/follows.
#[async_trait]
pub trait GraphApi: Send + Sync {
    async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page, ApiError>;
}

/// GraphApi backed by the real XRPC HTTP endpoints
#[derive(Debug, Clone)]
pub struct HttpGraphClient {
    client: Client,
    base: Url,
}

impl HttpGraphClient {
    // Creates a client for the given XRPC base URL
    //
    // Parameters:
    //   base_url: e.g. "https://public.api.bsky.app/xrpc/"
    //   timeout: per-request timeout
    //
    // A trailing slash is added when missing so Url::join keeps the /xrpc/
    // path segment instead of replacing it.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&normalized)?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("graph-harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base })
    }

    // Builds the full URL for one page request, including the query string
    fn page_url(&self, request: &PageRequest<'_>) -> Result<Url, ApiError> {
        let mut url = self.base.join(request.relation.endpoint())?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("actor", request.actor);
            query.append_pair("limit", &request.limit.clamp(1, MAX_PAGE_LIMIT).to_string());
            if let Some(cursor) = request.cursor {
                query.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl GraphApi for HttpGraphClient {
    async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page, ApiError> {
        let endpoint = request.relation.endpoint();
        let url = self.page_url(&request)?;

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                body,
            });
        }

        let body = response.text().await?;
        let page = parse_page(&body, request.relation).map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        debug!(
            actor = request.actor,
            endpoint,
            items = page.items.len(),
            has_cursor = page.cursor.is_some(),
            "fetched page"
        );
        Ok(page)
    }
}

// Turns a raw response body into a Page
//
// The list lives under "followers" or "follows" depending on the endpoint.
// A missing list is treated as an empty page; an empty cursor string is
// treated the same as no cursor.
fn parse_page(body: &str, relation: Relation) -> Result<Page, serde_json::Error> {
    let mut value: Value = serde_json::from_str(body)?;

    let items = match value.get_mut(relation.batch_name()).map(Value::take) {
        Some(list) => serde_json::from_value::<Vec<ProfilePayload>>(list)?,
        None => Vec::new(),
    };

    let cursor = value
        .get("cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(Page { items, cursor })
}
