// src/error.rs
// =============================================================================
// Typed errors for the crawler.
//
// Two families:
// - ApiError: something went wrong talking to the graph API for one page
// - CrawlError: configuration, record validation and batch file problems
//   (including the arrow/parquet encoding of those files)
//
// The top level (main.rs) still uses anyhow::Result so it can attach context,
// but everything below it returns one of these enums.
//
// Rust concepts:
// - thiserror: derive macro that implements std::error::Error + Display
// - #[from]: automatic conversion so the ? operator works across error types
// =============================================================================

use std::path::PathBuf;
use thiserror::Error;

/// Failure while fetching one page from the remote graph API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, TLS, timeout, reset...)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success HTTP status
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        status: u16,
        endpoint: String,
        body: String,
    },

    /// The response body was not the JSON shape we expected
    #[error("could not decode {endpoint} response: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// The configured base URL cannot be joined with an endpoint name
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Failure in configuration or in the persistence side of the pipeline.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("no seed actor given: pass --actor or set BSKY_ACTOR")]
    MissingSeed,

    #[error("seed actor '{0}' is not a crawlable handle")]
    InvalidSeed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A record reached the writer without a usable identity
    #[error("invalid edge record from {source_actor}: {reason}")]
    InvalidRecord {
        source_actor: String,
        reason: String,
    },

    /// Rows could not be assembled into columns
    #[error("could not build record batch: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A batch file could not be encoded or read back
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CrawlError {
    /// Wraps an io::Error together with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CrawlError::Io {
            path: path.into(),
            source,
        }
    }
}
