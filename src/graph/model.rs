// src/graph/model.rs
// =============================================================================
// Data types shared by the client, the workers and the batch writer.
//
// - Actor: a handle or DID string, nothing more
// - Relation: which direction of the follow graph we are walking
// - ProfilePayload: the raw account record the API returned
// - Edge: one payload plus the fields the crawler injects
// - Page: one API response (payloads + optional cursor)
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CrawlError;

/// An actor is just its handle (or DID) as returned by the API
pub type Actor = String;

/// The API reports accounts whose handle no longer resolves with this value
pub const INVALID_HANDLE: &str = "handle.invalid";

/// Returns true when `actor` can be crawled
pub fn is_crawlable(actor: &str) -> bool {
    !actor.trim().is_empty() && actor != INVALID_HANDLE
}

/// Direction of a follow relationship, seen from the source actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Accounts that follow the source actor (getFollowers)
    Follower,
    /// Accounts the source actor follows (getFollows)
    Following,
}

impl Relation {
    /// Both directions, in the order workers fetch them
    pub const ALL: [Relation; 2] = [Relation::Following, Relation::Follower];

    /// XRPC method name for this direction
    pub fn endpoint(self) -> &'static str {
        match self {
            Relation::Follower => "app.bsky.graph.getFollowers",
            Relation::Following => "app.bsky.graph.getFollows",
        }
    }

    /// Value stored in the `relation` column of batch files
    pub fn label(self) -> &'static str {
        match self {
            Relation::Follower => "follower",
            Relation::Following => "following",
        }
    }

    /// Name used for the JSON array in responses and for output batches
    pub fn batch_name(self) -> &'static str {
        match self {
            Relation::Follower => "followers",
            Relation::Following => "follows",
        }
    }
}

/// Profile attributes of the related account.
///
/// The API adds and drops fields between calls, so only the identity fields
/// are named; everything else is kept as-is in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
impl ProfilePayload {
    pub fn with_handle(handle: &str) -> Self {
        ProfilePayload {
            handle: Some(handle.to_string()),
            ..Default::default()
        }
    }
}

/// One observed follow relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// The actor whose followers/follows were being walked
    pub source_actor: Actor,
    pub relation: Relation,
    /// When the page holding this record was received
    pub observed_at: DateTime<Utc>,
    /// Raw fields of the related account, flattened into the record
    #[serde(flatten)]
    pub payload: ProfilePayload,
}

impl Edge {
    /// Handle of the related account, if the API sent one
    pub fn related_handle(&self) -> Option<&str> {
        self.payload.handle.as_deref()
    }

    /// Checks the record is writable: it must identify the related account
    /// by a non-empty DID or handle.
    pub fn validate(&self) -> Result<(), CrawlError> {
        let has_identity = [&self.payload.did, &self.payload.handle]
            .into_iter()
            .flatten()
            .any(|id| !id.trim().is_empty());

        if has_identity {
            Ok(())
        } else {
            Err(CrawlError::InvalidRecord {
                source_actor: self.source_actor.clone(),
                reason: "payload has neither did nor handle".to_string(),
            })
        }
    }
}

/// One response from a paginated endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<ProfilePayload>,
    /// None (or empty) means there are no more pages
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalid_handle_not_crawlable() {
        assert!(!is_crawlable(INVALID_HANDLE));
        assert!(!is_crawlable("  "));
        assert!(is_crawlable("alice.bsky.social"));
    }

    #[test]
    fn test_payload_keeps_unknown_fields() {
        let payload: ProfilePayload = serde_json::from_value(json!({
            "did": "did:plc:abc",
            "handle": "bob.bsky.social",
            "displayName": "Bob",
            "avatar": "https://cdn.example/bob.jpg",
            "labels": []
        }))
        .unwrap();

        assert_eq!(payload.handle.as_deref(), Some("bob.bsky.social"));
        assert_eq!(payload.display_name.as_deref(), Some("Bob"));
        assert_eq!(payload.extra.len(), 2);
        assert!(payload.extra.contains_key("avatar"));
    }

    #[test]
    fn test_edge_serializes_flat() {
        let edge = Edge {
            source_actor: "alice".to_string(),
            relation: Relation::Follower,
            observed_at: Utc::now(),
            payload: ProfilePayload::with_handle("bob"),
        };
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["source_actor"], "alice");
        assert_eq!(value["relation"], "follower");
        assert_eq!(value["handle"], "bob");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_edge_without_identity_is_rejected() {
        let edge = Edge {
            source_actor: "alice".to_string(),
            relation: Relation::Following,
            observed_at: Utc::now(),
            payload: ProfilePayload::default(),
        };
        assert!(edge.validate().is_err());
    }
}
