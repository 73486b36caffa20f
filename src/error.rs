use crate::index::types::{Mode, ShardId};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The directory has never been committed to. Distinct from other I/O
    /// failures so mode resolution can treat it as "oldest possible".
    #[error("no segments file found in {0}")]
    NoSegments(PathBuf),

    #[error("Corrupt index data in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("[Index={index}, Shard={shard}] shard not set in {expected} mode. Shard mode: {actual}")]
    ShardModeMismatch {
        index: String,
        shard: ShardId,
        expected: Mode,
        actual: Mode,
    },

    #[error("[Index={index}] rebuild target {target} is already serving")]
    RebuildTargetActive { index: String, target: Mode },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),
}

impl IndexError {
    pub fn is_no_segments(&self) -> bool {
        matches!(self, IndexError::NoSegments(_))
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
