use crate::index::commit::CommitPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Shard identifier within an index
pub type ShardId = u32;

/// Position of a document inside one segment
pub type DocOrdinal = u32;

/// Which physical location of every shard pair is serving reads and updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Mode {
    #[default]
    Primary,
    Secondary,
}

impl Mode {
    pub fn opposite(self) -> Self {
        match self {
            Mode::Primary => Mode::Secondary,
            Mode::Secondary => Mode::Primary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Primary => "Primary",
            Mode::Secondary => "Secondary",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a directory mode")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Primary" => Ok(Mode::Primary),
            "Secondary" => Ok(Mode::Secondary),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Names of the properties an index persists
pub struct IndexProperties;

impl IndexProperties {
    /// Mode currently serving reads and incremental updates
    pub const READ_UPDATE_DIRECTORY: &'static str = "ReadUpdateDirectory";
    /// Mode the next full rebuild writes into
    pub const FULL_REBUILD_DIRECTORY: &'static str = "FullRebuildDirectory";
    /// Unix millis of the last successful full rebuild
    pub const LAST_FULL_REBUILD: &'static str = "LastFullRebuild";
    /// Source folder crawled by the CLI
    pub const SOURCE_ROOT: &'static str = "SourceRoot";
}

/// A document as stored in a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: None,
            content: content.into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// One committed segment as listed in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Generation of the commit that wrote the segment (also its folder name)
    pub generation: u64,
    pub doc_count: u32,
}

/// `segments.json`: the commit point of one index directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentsManifest {
    pub version: u32,
    pub generation: u64,
    /// Oldest first
    pub segments: Vec<SegmentInfo>,
    /// Document id -> generation of the commit that deleted it
    #[serde(default)]
    pub tombstones: BTreeMap<String, u64>,
    pub created_at: i64,
    /// Unix millis of the last commit
    pub last_modified: i64,
}

impl Default for SegmentsManifest {
    fn default() -> Self {
        Self {
            version: 1,
            generation: 0,
            segments: Vec::new(),
            tombstones: BTreeMap::new(),
            created_at: 0,
            last_modified: 0,
        }
    }
}

/// Search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub path: Option<PathBuf>,
    pub shard: ShardId,
    pub score: f32,
}

/// Per-shard snapshot for status output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardStatus {
    pub shard: ShardId,
    pub mode: Mode,
    /// `None` when the location holds no segments yet
    pub primary_modified: Option<i64>,
    pub secondary_modified: Option<i64>,
    pub live_documents: usize,
}

/// Engine settings for one index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub shard_count: u32,
    pub commit_policy: CommitPolicy,
    /// Entries kept in the query result cache
    pub query_cache_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            shard_count: 2,
            commit_policy: CommitPolicy::Manual,
            query_cache_size: 128,
        }
    }
}

/// Options for one rebuild run
#[derive(Debug, Clone)]
pub struct IndexingOptions {
    /// Documents loaded and tokenized per parallel batch
    pub batch_size: usize,
    /// Tokenize batches on the rayon pool
    pub parallel: bool,
    /// Suppress progress output
    pub silent: bool,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            parallel: true,
            silent: true,
        }
    }
}

/// Outcome of a completed rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    pub documents: usize,
    pub skipped: usize,
    /// Mode that became active when the rebuild switched directories
    pub active: Mode,
}
