use std::{path::PathBuf, time::Duration};

use crate::pipeline::IngestStage;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt index entry in collection '{collection}': {reason}")]
    Corrupt { collection: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to load {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    #[error(
        "dimension mismatch in collection '{collection}': expected {expected}, got {actual}"
    )]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection '{0}' has no indexed content")]
    EmptyCollection(String),

    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("all {attempted} map calls failed")]
    AllMapCallsFailed { attempted: usize },

    #[error("ingest failed while {stage}: {source}")]
    Ingest {
        stage: IngestStage,
        #[source]
        source: Box<Error>,
    },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub(crate) fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether a caller-side retry has a chance of succeeding.
    ///
    /// Only transient provider failures qualify. The core itself never
    /// retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { .. } | Self::Timeout { .. } => true,
            Self::Ingest { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
