use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`Repository`](crate::store::Repository) call.
/// Each call is one transaction, so an error means that call's batch was not committed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("batch rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file does not exist or is not a regular file: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to stage {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} has no {column:?} column", .path.display())]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("staging unavailable: {0}")]
    State(String),

    #[error(
        "publication mapping incomplete after {committed_chunks} committed chunk(s) \
         ({upserted} publications upserted): {source}"
    )]
    MappingIncomplete {
        committed_chunks: usize,
        upserted: u64,
        #[source]
        source: StoreError,
    },

    #[error("publication mapping is empty; publications must be resolved before articles are loaded")]
    Precondition,

    #[error(
        "article load failed after {committed_chunks} committed chunk(s) \
         ({inserted} articles inserted): {source}"
    )]
    Load {
        committed_chunks: usize,
        inserted: u64,
        #[source]
        source: StoreError,
    },

    #[error("run exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("repository unavailable: {0}")]
    Store(#[source] StoreError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
