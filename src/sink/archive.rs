// src/sink/archive.rs
// =============================================================================
// Read side of the batch files: which handles has an earlier run already
// seen around a given root actor?
//
// The `expand` subcommand uses this to start a new round from saved data
// instead of asking the API again. Only the source_actor and handle columns
// are looked at. Files that do not decode are skipped with a warning; a
// missing directory just means nothing was saved yet.
//
// Parquet decoding is blocking, so each file is read on the blocking pool.
// =============================================================================

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task;
use tracing::{debug, warn};

use super::batch::{batch_index, read_batch_file, text_column};
use crate::error::CrawlError;
use crate::graph::{is_crawlable, Actor, Relation};

/// Read-only source of previously observed handles for a root actor
#[async_trait]
pub trait HandleProvider: Send + Sync {
    async fn handles_for(&self, root: &str) -> Result<Vec<Actor>, CrawlError>;
}

/// HandleProvider over the follows/ and followers/ batch directories
#[derive(Debug, Clone)]
pub struct BatchArchive {
    root: PathBuf,
}

impl BatchArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    // Batch files of one relation type, sorted by their number
    async fn batch_files(&self, relation: Relation) -> Result<Vec<PathBuf>, CrawlError> {
        let dir = self.root.join(relation.batch_name());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CrawlError::io(&dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| CrawlError::io(&dir, e))? {
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(|n| batch_index(n, relation)) {
                files.push((index, entry.path()));
            }
        }
        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

#[async_trait]
impl HandleProvider for BatchArchive {
    async fn handles_for(&self, root: &str) -> Result<Vec<Actor>, CrawlError> {
        let mut handles = BTreeSet::new();

        for relation in Relation::ALL {
            for path in self.batch_files(relation).await? {
                let (file, owner) = (path.clone(), root.to_string());
                let loaded = task::spawn_blocking(move || handles_in(&file, &owner))
                    .await
                    .map_err(|e| CrawlError::io(&path, std::io::Error::other(e)))?;

                match loaded {
                    Ok(found) => handles.extend(found),
                    Err(e @ CrawlError::Io { .. }) => return Err(e),
                    Err(e) => warn!("Skipping {}: {}", path.display(), e),
                }
            }
        }

        debug!(root, count = handles.len(), "handles loaded from archive");
        Ok(handles.into_iter().collect())
    }
}

// Crawlable handles recorded with `root` as their source actor in one file
fn handles_in(path: &Path, root: &str) -> Result<Vec<Actor>, CrawlError> {
    let mut found = Vec::new();

    for batch in read_batch_file(path)? {
        let (Some(sources), Some(handles)) =
            (text_column(&batch, "source_actor"), text_column(&batch, "handle"))
        else {
            warn!("{} has no source_actor/handle columns", path.display());
            continue;
        };

        for (source, handle) in sources.iter().zip(handles.iter()) {
            if source != Some(root) {
                continue;
            }
            if let Some(handle) = handle.filter(|h| is_crawlable(h)) {
                found.push(handle.to_string());
            }
        }
    }

    Ok(found)
}
