use crate::error::{IndexError, Result};
use crate::index::types::SegmentsManifest;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Commit point file of an index directory
pub const MANIFEST_FILE: &str = "segments.json";

const SEGMENT_PREFIX: &str = "seg_";

/// Current time in Unix milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One physical storage location holding a complete segment set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDirectory {
    path: PathBuf,
}

impl IndexDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    pub fn segment_path(&self, generation: u64) -> PathBuf {
        self.path.join(format!("{}{:06}", SEGMENT_PREFIX, generation))
    }

    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        Ok(())
    }

    pub fn has_segments(&self) -> bool {
        self.manifest_path().is_file()
    }

    /// Read the commit point; [`IndexError::NoSegments`] if never committed
    pub fn read_manifest(&self) -> Result<SegmentsManifest> {
        let manifest_path = self.manifest_path();
        let content = match fs::read(&manifest_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IndexError::NoSegments(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content)
            .map_err(|e| IndexError::corrupt(&manifest_path, e.to_string()))
    }

    /// Like [`read_manifest`](Self::read_manifest) but an empty manifest
    /// when nothing was committed yet
    pub fn read_manifest_or_default(&self) -> Result<SegmentsManifest> {
        match self.read_manifest() {
            Err(e) if e.is_no_segments() => Ok(SegmentsManifest::default()),
            other => other,
        }
    }

    /// Replace the commit point (temp file + rename, so readers see either
    /// the old or the new manifest)
    pub fn write_manifest(&self, manifest: &SegmentsManifest) -> Result<()> {
        self.ensure_exists()?;
        let tmp_path = self.path.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp_path, serde_json::to_vec_pretty(manifest)?)?;
        fs::rename(&tmp_path, self.manifest_path())?;
        Ok(())
    }

    /// Unix millis of the last commit
    pub fn last_modified(&self) -> Result<i64> {
        Ok(self.read_manifest()?.last_modified)
    }

    /// Remove every segment and the commit point
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        match fs::remove_file(self.manifest_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SEGMENT_PREFIX) && entry.path().is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else if name.ends_with(".tmp") {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Delete segment folders the manifest no longer references
    pub fn remove_unreferenced(&self, manifest: &SegmentsManifest) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(generation) = name
                .to_str()
                .and_then(|n| n.strip_prefix(SEGMENT_PREFIX))
                .and_then(|g| g.parse::<u64>().ok())
            else {
                continue;
            };
            if !manifest.segments.iter().any(|s| s.generation == generation) {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
