// src/graph/mod.rs
// =============================================================================
// This module handles everything about reading the social graph.
//
// Submodules:
// - model: Actor, Relation, Edge and Page types
// - client: the GraphApi trait and its HTTP implementation
// - paginate: RelationWalk, a lazy cursor-driven sequence of edges
// =============================================================================

mod client;
pub mod model;
mod paginate;

#[cfg(test)]
pub mod testing;

pub use client::{GraphApi, HttpGraphClient, DEFAULT_API_BASE, MAX_PAGE_LIMIT};
pub use model::{is_crawlable, Actor, Edge, Relation};
pub use paginate::RelationWalk;
