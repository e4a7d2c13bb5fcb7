// src/sink/batch.rs
// =============================================================================
// This module accumulates edges of one relation type and writes them out in
// size-bounded columnar (Parquet) files.
//
// How it works:
// 1. Edges are validated and flattened into rows: fixed identity columns
//    plus one text column per extra payload field
// 2. Each row adds its size to a running estimate
// 3. As soon as the estimate reaches the threshold, the rows so far become
//    <dir>/<type>_NNNN.parquet and the estimate starts over
// 4. finish() writes whatever is left at the end of the run
//
// Writing is staged so one actor's records land on disk completely or not
// at all:
//   stage()      -> rows join the buffer, the old length is the mark
//   write_full() -> full files are written but stay "pending"
//   commit()     -> pending files become part of the output
//   rollback()   -> pending files are deleted, the buffer is cut back to
//                   the mark and their numbers are reused
//
// Files are opened with create_new, so an existing file is never touched.
// Numbering continues after the highest index already in the directory.
//
// Rust concepts:
// - arrow: in-memory columns (StringArray, TimestampMicrosecondArray)
// - parquet::arrow::ArrowWriter: encodes a RecordBatch as a Parquet file
// - tokio::fs: async file I/O
// =============================================================================

use arrow::array::{Array, ArrayRef, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::CrawlError;
use crate::graph::{Edge, Relation};

pub const BATCH_EXTENSION: &str = "parquet";

// Columns every batch file has, in this order
const FIXED_COLUMNS: [&str; 6] = [
    "source_actor",
    "relation",
    "observed_at",
    "did",
    "handle",
    "display_name",
];

/// One edge flattened into column values
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    source_actor: String,
    relation: Relation,
    observed_at: i64,
    did: Option<String>,
    handle: Option<String>,
    display_name: Option<String>,
    /// Extra payload fields by column name; strings as-is, anything else as
    /// JSON text
    extra: BTreeMap<String, String>,
    size: usize,
}

impl BatchRow {
    fn from_edge(edge: &Edge) -> Self {
        let extra: BTreeMap<String, String> = edge
            .payload
            .extra
            .iter()
            .map(|(key, value)| {
                let column = if FIXED_COLUMNS.contains(&key.as_str()) {
                    format!("payload_{}", key)
                } else {
                    key.clone()
                };
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (column, text)
            })
            .collect();

        let optional = [&edge.payload.did, &edge.payload.handle, &edge.payload.display_name]
            .into_iter()
            .flatten()
            .map(String::len)
            .sum::<usize>();
        let size = edge.source_actor.len()
            + edge.relation.label().len()
            + 8
            + optional
            + extra.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>();

        Self {
            source_actor: edge.source_actor.clone(),
            relation: edge.relation,
            observed_at: edge.observed_at.timestamp_micros(),
            did: edge.payload.did.clone(),
            handle: edge.payload.handle.clone(),
            display_name: edge.payload.display_name.clone(),
            extra,
            size,
        }
    }
}

/// In-memory batch for one relation type, plus its file counter
#[derive(Debug)]
pub struct RelationBatch {
    relation: Relation,
    dir: PathBuf,
    threshold: usize,
    rows: Vec<BatchRow>,
    /// rows[..cut] are already in pending files
    cut: usize,
    pending: Vec<PathBuf>,
    next_index: u32,
    committed_index: u32,
    written: Vec<PathBuf>,
}

impl RelationBatch {
    // Prepares <root>/<type>/ and finds the next free file number
    //
    // Parameters:
    //   root: the output directory
    //   relation: which edges this batch holds
    //   threshold: rotation size in estimated bytes
    pub async fn open(root: &Path, relation: Relation, threshold: usize) -> Result<Self, CrawlError> {
        let dir = root.join(relation.batch_name());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CrawlError::io(&dir, e))?;

        let next_index = highest_index(&dir, relation).await? + 1;
        debug!(dir = %dir.display(), next_index, "batch directory ready");

        Ok(Self {
            relation,
            dir,
            threshold: threshold.max(1),
            rows: Vec::new(),
            cut: 0,
            pending: Vec::new(),
            next_index,
            committed_index: next_index,
            written: Vec::new(),
        })
    }

    /// Validates and flattens edges without touching the batch. Either
    /// every edge converts or none is kept.
    pub fn encode(&self, edges: &[Edge]) -> Result<Vec<BatchRow>, CrawlError> {
        edges
            .iter()
            .map(|edge| {
                if edge.relation != self.relation {
                    return Err(CrawlError::InvalidRecord {
                        source_actor: edge.source_actor.clone(),
                        reason: format!(
                            "{:?} edge sent to the {} batch",
                            edge.relation,
                            self.relation.batch_name()
                        ),
                    });
                }
                edge.validate()?;
                Ok(BatchRow::from_edge(edge))
            })
            .collect()
    }

    /// Adds rows to the buffer. Returns the mark to roll back to.
    pub fn stage(&mut self, rows: Vec<BatchRow>) -> usize {
        let mark = self.rows.len();
        self.rows.extend(rows);
        mark
    }

    // Writes a pending file every time the estimate of the unwritten rows
    // reaches the threshold. Rows past the last full file stay buffered.
    pub async fn write_full(&mut self) -> Result<(), CrawlError> {
        let mut start = self.cut;
        let mut estimate = 0;

        for end in self.cut + 1..=self.rows.len() {
            estimate += self.rows[end - 1].size;
            if estimate >= self.threshold {
                self.write_file(start, end).await?;
                start = end;
                estimate = 0;
            }
        }
        Ok(())
    }

    /// Makes the pending files part of the output and forgets their rows
    pub fn commit(&mut self) {
        self.rows.drain(..self.cut);
        self.cut = 0;
        self.written.append(&mut self.pending);
        self.committed_index = self.next_index;
    }

    // Undoes everything since the last commit back to `mark`: pending files
    // are removed and their numbers handed out again
    pub async fn rollback(&mut self, mark: usize) {
        for path in std::mem::take(&mut self.pending) {
            discard(&path).await;
        }
        self.rows.truncate(mark);
        self.cut = 0;
        self.next_index = self.committed_index;
    }

    /// End-of-run drain: writes and commits whatever is left
    pub async fn finish(&mut self) -> Result<Option<PathBuf>, CrawlError> {
        if self.cut < self.rows.len() {
            let end = self.rows.len();
            self.write_file(self.cut, end).await?;
        }
        let last = self.pending.last().cloned();
        self.commit();
        Ok(last)
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    pub fn files_written(&self) -> &[PathBuf] {
        &self.written
    }

    // Encodes rows[start..end] and writes them to the next free number.
    // A file that cannot be written completely is removed again.
    async fn write_file(&mut self, start: usize, end: usize) -> Result<(), CrawlError> {
        let rows = &self.rows[start..end];
        let body = encode_parquet(&record_batch(rows)?)?;
        let estimate: usize = rows.iter().map(|r| r.size).sum();

        loop {
            let path = self.dir.join(format!(
                "{}_{:04}.{}",
                self.relation.batch_name(),
                self.next_index,
                BATCH_EXTENSION
            ));

            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "batch number taken, skipping");
                    self.next_index += 1;
                    continue;
                }
                Err(e) => return Err(CrawlError::io(&path, e)),
            };

            let written = match file.write_all(&body).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            drop(file);
            if let Err(e) = written {
                discard(&path).await;
                return Err(CrawlError::io(&path, e));
            }

            info!(
                "Wrote {} {} records (~{} bytes) to {}",
                end - start,
                self.relation.batch_name(),
                estimate,
                path.display()
            );

            self.next_index += 1;
            self.cut = end;
            self.pending.push(path);
            return Ok(());
        }
    }
}

// Builds one RecordBatch; the extra columns are the union of the rows'
// extra fields, null where a row does not have one
fn record_batch(rows: &[BatchRow]) -> Result<RecordBatch, CrawlError> {
    let extra_columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.extra.keys().map(String::as_str))
        .collect();

    let utc: Arc<str> = Arc::from("UTC");
    let mut fields = vec![
        Field::new(FIXED_COLUMNS[0], DataType::Utf8, false),
        Field::new(FIXED_COLUMNS[1], DataType::Utf8, false),
        Field::new(
            FIXED_COLUMNS[2],
            DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::clone(&utc))),
            false,
        ),
        Field::new(FIXED_COLUMNS[3], DataType::Utf8, true),
        Field::new(FIXED_COLUMNS[4], DataType::Utf8, true),
        Field::new(FIXED_COLUMNS[5], DataType::Utf8, true),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.source_actor.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.relation.label()))),
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(rows.iter().map(|r| r.observed_at))
                .with_timezone(utc),
        ),
        Arc::new(rows.iter().map(|r| r.did.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.handle.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.display_name.as_deref()).collect::<StringArray>()),
    ];

    for name in extra_columns {
        fields.push(Field::new(name, DataType::Utf8, true));
        columns.push(Arc::new(
            rows.iter()
                .map(|r| r.extra.get(name).map(String::as_str))
                .collect::<StringArray>(),
        ));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>, CrawlError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props))?;
    writer.write(batch)?;
    Ok(writer.into_inner()?)
}

/// Reads every record batch of one batch file (blocking)
pub fn read_batch_file(path: &Path) -> Result<Vec<RecordBatch>, CrawlError> {
    let file = std::fs::File::open(path).map_err(|e| CrawlError::io(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    Ok(reader.collect::<Result<Vec<_>, _>>()?)
}

/// A text column of a batch read back from disk
pub fn text_column<'b>(batch: &'b RecordBatch, name: &str) -> Option<&'b StringArray> {
    batch
        .column_by_name(name)?
        .as_any()
        .downcast_ref::<StringArray>()
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("Could not remove {}: {}", path.display(), e);
    }
}

/// Parses "<type>_NNNN.parquet" and returns NNNN
pub fn batch_index(file_name: &str, relation: Relation) -> Option<u32> {
    file_name
        .strip_prefix(relation.batch_name())?
        .strip_prefix('_')?
        .strip_suffix(BATCH_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

// Highest batch number already present in `dir` (0 when there is none)
async fn highest_index(dir: &Path, relation: Relation) -> Result<u32, CrawlError> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| CrawlError::io(dir, e))?;
    let mut highest = 0;

    while let Some(entry) = entries.next_entry().await.map_err(|e| CrawlError::io(dir, e))? {
        if let Some(index) = entry.file_name().to_str().and_then(|n| batch_index(n, relation)) {
            highest = highest.max(index);
        }
    }

    Ok(highest)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::graph::model::ProfilePayload;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    // fixed timestamp so every record has the same estimate
    pub fn edge(source: &str, handle: &str, relation: Relation) -> Edge {
        Edge {
            source_actor: source.to_string(),
            relation,
            observed_at: Utc.with_ymd_and_hms(2024, 11, 20, 12, 0, 0).unwrap(),
            payload: ProfilePayload::with_handle(handle),
        }
    }

    /// (source_actor, handle) of every row in a file
    pub fn read_pairs(path: &Path) -> Vec<(String, String)> {
        read_batch_file(path)
            .unwrap()
            .iter()
            .flat_map(|batch| {
                let sources = text_column(batch, "source_actor").unwrap();
                let handles = text_column(batch, "handle").unwrap();
                sources
                    .iter()
                    .zip(handles.iter())
                    .map(|(s, h)| (s.unwrap().to_string(), h.unwrap_or_default().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    async fn append(batch: &mut RelationBatch, edges: &[Edge]) {
        let rows = batch.encode(edges).unwrap();
        batch.stage(rows);
        batch.write_full().await.unwrap();
        batch.commit();
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_batch_index_parsing() {
        assert_eq!(batch_index("follows_0007.parquet", Relation::Following), Some(7));
        assert_eq!(batch_index("followers_0012.parquet", Relation::Follower), Some(12));
        assert_eq!(batch_index("followers_0001.parquet", Relation::Following), None);
        assert_eq!(batch_index("follows_abcd.parquet", Relation::Following), None);
        assert_eq!(batch_index("follows_0001.jsonl", Relation::Following), None);
    }

    #[tokio::test]
    async fn test_rotation_bounds_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let sizing = RelationBatch::open(dir.path(), Relation::Follower, 1).await.unwrap();
        let record = sizing.encode(&[edge("alice", "u00", Relation::Follower)]).unwrap()[0].size;

        // room for two records, the third crosses the threshold
        let threshold = record * 2 + 1;
        let mut batch = RelationBatch::open(dir.path(), Relation::Follower, threshold).await.unwrap();

        for round in 0..3 {
            let edges: Vec<Edge> = (0..2)
                .map(|i| edge("alice", &format!("u{}{}", round, i), Relation::Follower))
                .collect();
            append(&mut batch, &edges).await;
        }
        assert_eq!(batch.finish().await.unwrap(), None);

        let files = batch.files_written().to_vec();
        assert_eq!(files.len(), 2);
        let first = read_pairs(&files[0]);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], ("alice".to_string(), "u00".to_string()));
        assert_eq!(read_pairs(&files[1]).len(), 3);
    }

    #[tokio::test]
    async fn test_flush_before_next_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut batch = RelationBatch::open(dir.path(), Relation::Following, 1).await.unwrap();

        append(&mut batch, &[edge("alice", "bob", Relation::Following)]).await;
        assert_eq!(batch.files_written().len(), 1);

        append(&mut batch, &[edge("alice", "carol", Relation::Following)]).await;

        let files = batch.files_written();
        assert_eq!(files.len(), 2);
        assert_eq!(read_pairs(&files[0])[0].1, "bob");
        assert_eq!(read_pairs(&files[1])[0].1, "carol");
    }

    #[tokio::test]
    async fn test_extra_payload_fields_become_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut batch = RelationBatch::open(dir.path(), Relation::Follower, 1 << 20).await.unwrap();

        let mut with_avatar = edge("alice", "bob", Relation::Follower);
        with_avatar.payload.extra.insert("avatar".into(), json!("https://cdn.example/bob.jpg"));
        with_avatar.payload.extra.insert("labels".into(), json!([]));
        let plain = edge("alice", "carol", Relation::Follower);

        append(&mut batch, &[with_avatar, plain]).await;
        let path = batch.finish().await.unwrap().unwrap();

        let batches = read_batch_file(&path).unwrap();
        let schema = batches[0].schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec!["source_actor", "relation", "observed_at", "did", "handle", "display_name", "avatar", "labels"]
        );

        let avatar = text_column(&batches[0], "avatar").unwrap();
        assert_eq!(avatar.value(0), "https://cdn.example/bob.jpg");
        assert!(avatar.is_null(1));
        assert_eq!(text_column(&batches[0], "labels").unwrap().value(0), "[]");
        assert_eq!(text_column(&batches[0], "relation").unwrap().value(1), "follower");
    }

    #[tokio::test]
    async fn test_finish_skips_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut batch = RelationBatch::open(dir.path(), Relation::Follower, 1024).await.unwrap();
        assert_eq!(batch.finish().await.unwrap(), None);
        assert!(batch.files_written().is_empty());
    }

    #[tokio::test]
    async fn test_numbering_continues_after_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let type_dir = dir.path().join("follows");
        std::fs::create_dir_all(&type_dir).unwrap();
        std::fs::write(type_dir.join("follows_0003.parquet"), "").unwrap();

        let mut batch = RelationBatch::open(dir.path(), Relation::Following, 1024).await.unwrap();
        append(&mut batch, &[edge("alice", "bob", Relation::Following)]).await;
        let path = batch.finish().await.unwrap().unwrap();

        assert!(path.ends_with("follows/follows_0004.parquet"));
    }

    #[tokio::test]
    async fn test_rollback_removes_pending_files_and_reuses_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let mut batch = RelationBatch::open(dir.path(), Relation::Following, 1).await.unwrap();

        append(&mut batch, &[edge("alice", "bob", Relation::Following)]).await;

        let rows = batch
            .encode(&[edge("dave", "x", Relation::Following), edge("dave", "y", Relation::Following)])
            .unwrap();
        let mark = batch.stage(rows);
        batch.write_full().await.unwrap();
        assert_eq!(files_in(&dir.path().join("follows")).len(), 3);

        batch.rollback(mark).await;
        assert_eq!(files_in(&dir.path().join("follows")), vec!["follows_0001.parquet"]);

        append(&mut batch, &[edge("erin", "z", Relation::Following)]).await;
        assert_eq!(
            files_in(&dir.path().join("follows")),
            vec!["follows_0001.parquet", "follows_0002.parquet"]
        );
        let everything: Vec<(String, String)> =
            batch.files_written().iter().flat_map(|p| read_pairs(p)).collect();
        assert!(everything.iter().all(|(source, _)| source != "dave"));
        assert_eq!(everything.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_rows_for_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let mut batch = RelationBatch::open(dir.path(), Relation::Follower, 1).await.unwrap();
        std::fs::remove_dir_all(dir.path().join("followers")).unwrap();

        let rows = batch.encode(&[edge("alice", "bob", Relation::Follower)]).unwrap();
        let mark = batch.stage(rows);
        assert!(batch.write_full().await.is_err());
        batch.rollback(mark).await;

        std::fs::create_dir_all(dir.path().join("followers")).unwrap();
        append(&mut batch, &[edge("carol", "dan", Relation::Follower)]).await;

        // the failed attempt did not burn a number
        assert_eq!(
            files_in(&dir.path().join("followers")),
            vec!["followers_0001.parquet"]
        );
        assert_eq!(
            read_pairs(&batch.files_written()[0]),
            vec![("carol".to_string(), "dan".to_string())]
        );
    }

    #[tokio::test]
    async fn test_encode_rejects_mismatched_or_anonymous_edges() {
        let dir = tempfile::tempdir().unwrap();
        let batch = RelationBatch::open(dir.path(), Relation::Following, 1024).await.unwrap();

        assert!(batch.encode(&[edge("alice", "bob", Relation::Follower)]).is_err());

        let mut anonymous = edge("alice", "bob", Relation::Following);
        anonymous.payload.handle = None;
        assert!(batch
            .encode(&[edge("alice", "carol", Relation::Following), anonymous])
            .is_err());
    }
}
