use crate::error::Result;
use crate::events::{EventBus, PropertyEvent};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw, un-namespaced property storage.
///
/// Writes publish [`PropertyEvent::Changed`] through the attached bus unless
/// property-changed events are suppressed on the calling thread.
pub trait PropertyBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;

    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Returns the number of removed entries
    fn remove_prefix(&self, prefix: &str) -> Result<usize>;

    /// All stored entries, ordered by key
    fn entries(&self) -> Result<Vec<(String, String)>>;
}

fn remove_prefixed(map: &mut BTreeMap<String, String>, prefix: &str) -> usize {
    let before = map.len();
    map.retain(|key, _| !key.starts_with(prefix));
    before - map.len()
}

/// In-process backend, mostly for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, String>>,
    events: Option<Arc<EventBus>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_events(events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(BTreeMap::new()),
            events: Some(events),
        })
    }
}

impl PropertyBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        if let Some(events) = &self.events {
            events.raise_property_changed(&PropertyEvent::Changed {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let removed = remove_prefixed(&mut self.values.lock(), prefix);
        if removed > 0
            && let Some(events) = &self.events
        {
            events.raise_property_changed(&PropertyEvent::Removed {
                prefix: prefix.to_string(),
            });
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .values
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Durable backend: a single JSON object on disk shared by every process
/// using the same path.
///
/// Reads go to the file each time. Mutations hold an exclusive lock on a
/// sidecar `.lock` file, re-read the current contents, apply the change and
/// rewrite the file atomically (temp file + rename), so writers in other
/// processes never lose each other's keys.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// Serializes writers within this process
    write_guard: Mutex<()>,
    events: Option<Arc<EventBus>>,
}

impl FileBackend {
    /// Open the store at `path`, creating an empty one if it does not exist
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        Self::open_with_events(path, None)
    }

    pub fn open_with_events(path: &Path, events: Option<Arc<EventBus>>) -> Result<Arc<Self>> {
        // fail early on an unreadable store
        load_values(path)?;
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            write_guard: Mutex::new(()),
            events,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Run `change` on the latest on-disk map under the cross-process lock.
    /// The map is written back when `change` reports it modified something.
    fn mutate<T>(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool)) -> Result<T> {
        let _guard = self.write_guard.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        lock.lock_exclusive()?;

        let result = load_values(&self.path).and_then(|mut values| {
            let (out, dirty) = change(&mut values);
            if dirty {
                self.persist(&values)?;
            }
            Ok(out)
        });

        FileExt::unlock(&lock)?;
        result
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn load_values(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&content)?)
}

impl PropertyBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(load_values(&self.path)?.remove(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|values| {
            values.insert(key.to_string(), value.to_string());
            ((), true)
        })?;
        if let Some(events) = &self.events {
            events.raise_property_changed(&PropertyEvent::Changed {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let removed = self.mutate(|values| {
            let removed = remove_prefixed(values, prefix);
            (removed, removed > 0)
        })?;
        if removed > 0
            && let Some(events) = &self.events
        {
            events.raise_property_changed(&PropertyEvent::Removed {
                prefix: prefix.to_string(),
            });
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(load_values(&self.path)?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PropertyChangedEventDisabler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("properties.json");

        let backend = FileBackend::open(&path).unwrap();
        backend.write("a_x", "1").unwrap();
        backend.write("a_y", "2").unwrap();
        backend.write("b_x", "3").unwrap();
        drop(backend);

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.read("a_y").unwrap().as_deref(), Some("2"));
        assert_eq!(reopened.remove_prefix("a_").unwrap(), 2);
        drop(reopened);

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.entries().unwrap(), vec![("b_x".to_string(), "3".to_string())]);
    }

    #[test]
    fn test_file_backend_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("properties.json");

        let first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path).unwrap();
        first.write("x_i_ReadUpdateDirectory", "Secondary").unwrap();
        second.write("y_i_ReadUpdateDirectory", "Primary").unwrap();

        // each handle sees the other's write without reopening
        assert_eq!(second.read("x_i_ReadUpdateDirectory").unwrap().as_deref(), Some("Secondary"));
        assert_eq!(first.read("y_i_ReadUpdateDirectory").unwrap().as_deref(), Some("Primary"));

        second.remove_prefix("y_").unwrap();
        first.write("x_i_FullRebuildDirectory", "Primary").unwrap();
        drop((first, second));

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(
            reopened.entries().unwrap(),
            vec![
                ("x_i_FullRebuildDirectory".to_string(), "Primary".to_string()),
                ("x_i_ReadUpdateDirectory".to_string(), "Secondary".to_string()),
            ]
        );
    }

    #[test]
    fn test_file_backend_writers_on_threads_keep_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("properties.json");

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let backend = FileBackend::open(&path).unwrap();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        backend.write(&format!("t{}_{}", t, i), "v").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(FileBackend::open(&path).unwrap().entries().unwrap().len(), 40);
    }

    #[test]
    fn test_memory_backend_respects_suppression() {
        let bus = EventBus::new();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let backend = MemoryBackend::with_events(bus);
        backend.write("k", "v").unwrap();
        {
            let _guard = PropertyChangedEventDisabler::new(true);
            backend.write("k", "w").unwrap();
        }
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(backend.read("k").unwrap().as_deref(), Some("w"));
    }
}
