//! Document sources for full rebuilds.

use crate::error::{IndexError, Result};
use crate::index::types::Document;
use crate::utils::is_binary;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Something a crawler found and can load later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub id: String,
    pub path: Option<PathBuf>,
}

/// Enumerates and loads documents for a full rebuild.
///
/// `discover` runs once per rebuild; `load` may be called from several
/// threads at once. Returning `None` from `load` skips the item.
pub trait Crawler: Send + Sync {
    fn name(&self) -> &str;

    fn discover(&self) -> Result<Vec<SourceItem>>;

    fn load(&self, item: &SourceItem) -> Option<Document>;
}

/// Crawls a folder, honouring `.gitignore` and extra glob excludes.
/// Document ids are `/`-separated paths relative to the root.
pub struct FsCrawler {
    root: PathBuf,
    name: String,
    ignored: GlobSet,
    max_file_size: u64,
}

impl FsCrawler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            name: root.display().to_string(),
            root,
            ignored: GlobSet::empty(),
            max_file_size: u64::MAX,
        }
    }

    pub fn with_ignored<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern.as_ref())
                .map_err(|e| IndexError::Config(format!("invalid ignore pattern: {}", e)))?;
            builder.add(glob);
        }
        self.ignored = builder
            .build()
            .map_err(|e| IndexError::Config(format!("invalid ignore patterns: {}", e)))?;
        Ok(self)
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Crawler for FsCrawler {
    fn name(&self) -> &str {
        &self.name
    }

    fn discover(&self) -> Result<Vec<SourceItem>> {
        if !self.root.is_dir() {
            return Err(IndexError::Config(format!(
                "source folder {} does not exist",
                self.root.display()
            )));
        }

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .filter_entry(|entry| entry.file_name() != OsStr::new(".git"))
            .build();

        let mut items: Vec<SourceItem> = walker
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let rel_path = entry.path().strip_prefix(&self.root).ok()?;
                if self.ignored.is_match(rel_path) {
                    return None;
                }
                let id = rel_path
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                Some(SourceItem {
                    id,
                    path: Some(entry.path().to_path_buf()),
                })
            })
            .collect();

        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    fn load(&self, item: &SourceItem) -> Option<Document> {
        let path = item.path.as_ref()?;
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("skipping {}: {}", path.display(), e);
                return None;
            }
        };
        if content.len() as u64 > self.max_file_size || is_binary(&content) {
            return None;
        }

        let text = String::from_utf8_lossy(&content).into_owned();
        Some(Document::new(item.id.clone(), text).with_path(path.clone()))
    }
}

/// In-memory document source, mostly for tests and benches
pub struct MemoryCrawler {
    name: String,
    documents: RwLock<BTreeMap<String, String>>,
}

impl MemoryCrawler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, id: impl Into<String>, content: impl Into<String>) {
        self.documents.write().insert(id.into(), content.into());
    }

    pub fn remove(&self, id: &str) -> bool {
        self.documents.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl Crawler for MemoryCrawler {
    fn name(&self) -> &str {
        &self.name
    }

    fn discover(&self) -> Result<Vec<SourceItem>> {
        Ok(self
            .documents
            .read()
            .keys()
            .map(|id| SourceItem {
                id: id.clone(),
                path: None,
            })
            .collect())
    }

    fn load(&self, item: &SourceItem) -> Option<Document> {
        self.documents
            .read()
            .get(&item.id)
            .map(|content| Document::new(item.id.clone(), content.clone()))
    }
}
