//! Error types shared across the metadata engine.

use thiserror::Error;

use crate::http::TransportError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Transport error during {operation} {url}: {source}")]
    Transport {
        operation: &'static str,
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("{operation} {url} failed with status {status}")]
    Status {
        operation: &'static str,
        url: String,
        status: u16,
    },

    #[error("Unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The re-pathed record was written but the stale one could not be removed.
    #[error("Metadata for {stale} was copied to {kept} but the old record could not be deleted: {source}")]
    DuplicateRecord {
        kept: String,
        stale: String,
        #[source]
        source: Box<MetadataError>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Metadata not loaded for node: {0}")]
    UnknownNode(String),

    #[error("Metadata is read-only: {0}")]
    ReadOnly(String),

    #[error("No active schema available")]
    NoActiveSchema,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MetadataError {
    /// Operation name used for failure reports.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Transport { operation, .. } | Self::Status { operation, .. } => *operation,
            Self::Decode { .. } => "decode",
            Self::DuplicateRecord { .. } => "resolve_consistency",
            Self::InvalidInput(_) => "parse_input",
            Self::UnknownNode(_) => "find_context",
            Self::ReadOnly(_) => "write_metadata",
            Self::NoActiveSchema => "select_schema",
            Self::Storage(_) => "storage",
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } | Self::Decode { url, .. } => {
                Some(url.as_str())
            }
            Self::DuplicateRecord { source, .. } => source.url(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::DuplicateRecord { source, .. } => source.status(),
            _ => None,
        }
    }

    /// True when the remote reported the resource does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
