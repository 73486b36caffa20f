use crate::error::Result;
use crate::index::directory::IndexDirectory;
use crate::index::reader::ShardReader;
use crate::index::types::{Mode, ShardId};
use fnv::FnvHasher;
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hasher;
use std::path::Path;
use std::sync::Arc;

/// The two physical locations of one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDirectoryPair {
    primary: IndexDirectory,
    secondary: IndexDirectory,
}

impl ShardDirectoryPair {
    /// `{shard_root}/primary` and `{shard_root}/secondary`
    pub fn create(shard_root: &Path) -> Result<Self> {
        let pair = Self {
            primary: IndexDirectory::new(shard_root.join("primary")),
            secondary: IndexDirectory::new(shard_root.join("secondary")),
        };
        pair.primary.ensure_exists()?;
        pair.secondary.ensure_exists()?;
        Ok(pair)
    }

    pub fn primary(&self) -> &IndexDirectory {
        &self.primary
    }

    pub fn secondary(&self) -> &IndexDirectory {
        &self.secondary
    }

    pub fn get(&self, mode: Mode) -> &IndexDirectory {
        match mode {
            Mode::Primary => &self.primary,
            Mode::Secondary => &self.secondary,
        }
    }
}

/// One shard: a directory pair plus which side currently serves
/// reads/updates and which receives full rebuilds.
pub struct Shard {
    id: ShardId,
    directories: ShardDirectoryPair,
    read_update: IndexDirectory,
    full_rebuild: IndexDirectory,
    reader: Mutex<Option<Arc<ShardReader>>>,
    write_lock: Mutex<()>,
}

impl Shard {
    /// A shard starts out serving from its primary location
    pub fn create(id: ShardId, shard_root: &Path) -> Result<Self> {
        let directories = ShardDirectoryPair::create(shard_root)?;
        Ok(Self {
            id,
            read_update: directories.primary().clone(),
            full_rebuild: directories.secondary().clone(),
            directories,
            reader: Mutex::new(None),
            write_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn directories(&self) -> &ShardDirectoryPair {
        &self.directories
    }

    /// Mode implied by which location is serving
    pub fn mode(&self) -> Mode {
        if self.read_update == *self.directories.secondary() {
            Mode::Secondary
        } else {
            Mode::Primary
        }
    }

    pub fn read_update_directory(&self) -> &IndexDirectory {
        &self.read_update
    }

    pub fn full_rebuild_directory(&self) -> &IndexDirectory {
        &self.full_rebuild
    }

    /// Point reads/updates at the `new_mode` side and rebuilds at the other
    pub fn switch_directories(&mut self, new_mode: Mode) {
        if self.mode() != new_mode {
            std::mem::swap(&mut self.read_update, &mut self.full_rebuild);
        }
        self.invalidate_reader();
    }

    /// Cached reader over the serving side
    pub fn reader(&self) -> Result<Arc<ShardReader>> {
        let mut cached = self.reader.lock();
        if let Some(reader) = cached.as_ref() {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(ShardReader::open(self.id, &self.read_update)?);
        *cached = Some(Arc::clone(&reader));
        Ok(reader)
    }

    pub fn invalidate_reader(&self) {
        *self.reader.lock() = None;
    }

    /// Serializes incremental commits to the serving side
    pub(crate) fn write_lock(&self) -> &Mutex<()> {
        &self.write_lock
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("mode", &self.mode())
            .field("read_update", &self.read_update.path())
            .finish()
    }
}

/// Stable routing of a document id to a shard
pub fn shard_for(id: &str, shard_count: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(id.as_bytes());
    (hasher.finish() % shard_count.max(1) as u64) as usize
}
