// src/sink/mod.rs
// =============================================================================
// This module owns the output directories.
//
// Submodules:
// - batch: size-bounded, rotating batch files for one relation type
// - aggregate: the single consumer of worker results
// - archive: reading saved batches back to seed a later round
//
// Only the aggregator writes files, so there is never more than one writer
// per directory.
// =============================================================================

mod aggregate;
mod archive;
mod batch;

pub use aggregate::Aggregator;
pub use archive::{BatchArchive, HandleProvider};

#[cfg(test)]
pub use batch::tests::read_pairs;
