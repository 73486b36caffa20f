//! End-to-end behaviour of the dual-directory index: mode resolution on
//! start, switching after full rebuilds, and what readers observe when a
//! rebuild does not complete.

use dualdex::events::{EventBus, PropertyEvent, property_events_suppressed};
use dualdex::index::{
    CancellationToken, CommitPolicy, CommitPolicyExecutor, Crawler, Document, DualDirectoryIndex, IndexConfig,
    IndexDirectory, IndexProperties, IndexingOptions, MemoryCrawler, Mode, SegmentsManifest, SourceItem,
};
use dualdex::store::{
    IndexPropertyStore, IndexStores, MemoryBackend, PostAction, PropertyBackend, PropertyStore, PropertyStoreEx,
};
use dualdex::{IndexError, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

struct Fixture {
    backend: Arc<MemoryBackend>,
    crawler: Arc<MemoryCrawler>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            backend: MemoryBackend::new(),
            crawler: Arc::new(MemoryCrawler::new("memory")),
        }
    }

    fn store(&self) -> Arc<IndexPropertyStore> {
        Arc::new(
            IndexPropertyStore::new("default")
                .with_key("products")
                .with_backend(self.backend.clone()),
        )
    }

    /// A fresh index object over `folder`, as a restarted process would create
    fn open(&self, folder: &Path) -> DualDirectoryIndex {
        let mut index = DualDirectoryIndex::new(
            "products",
            folder,
            IndexConfig::default(),
            IndexStores::extended(self.store()),
        );
        index.add_crawler(self.crawler.clone());
        index
    }

    fn persisted(&self) -> (String, String) {
        let store = self.store();
        (
            store.get(IndexProperties::READ_UPDATE_DIRECTORY).unwrap(),
            store.get(IndexProperties::FULL_REBUILD_DIRECTORY).unwrap(),
        )
    }
}

fn rebuild(index: &DualDirectoryIndex) -> Result<Mode> {
    index
        .rebuild(&IndexingOptions::default(), &CancellationToken::new())
        .map(|summary| summary.active)
}

fn stamp(directory: &Path, last_modified: i64) {
    IndexDirectory::new(directory)
        .write_manifest(&SegmentsManifest {
            generation: 1,
            last_modified,
            ..SegmentsManifest::default()
        })
        .unwrap();
}

#[test]
fn test_persisted_modes_stay_opposite_across_switches() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    fixture.crawler.insert("a", "red shirt");
    let index = fixture.open(dir.path());

    let mut expected = Mode::Primary;
    for step in 0..5 {
        let mode = if step % 2 == 0 {
            rebuild(&index).unwrap()
        } else {
            index.switch_directories().unwrap()
        };
        expected = expected.opposite();
        assert_eq!(mode, expected);

        let (read_update, full_rebuild) = fixture.persisted();
        assert_eq!(read_update, expected.as_str());
        assert_eq!(full_rebuild, expected.opposite().as_str());
    }

    index.switch_directories_to(Mode::Secondary).unwrap();
    assert_eq!(fixture.persisted(), ("Secondary".to_string(), "Primary".to_string()));
}

#[test]
fn test_newer_secondary_wins_without_persisted_mode() {
    let dir = tempfile::tempdir().unwrap();
    stamp(&dir.path().join("shard_0").join("secondary"), 100);
    stamp(&dir.path().join("shard_0").join("primary"), 50);

    let fixture = Fixture::new();
    let index = fixture.open(dir.path());
    index.ensure_initialized().unwrap();

    assert_eq!(index.mode(), Mode::Secondary);
    assert_eq!(fixture.persisted(), ("Secondary".to_string(), "Primary".to_string()));
}

#[test]
fn test_ties_and_empty_directories_resolve_primary() {
    let fixture = Fixture::new();

    let empty = tempfile::tempdir().unwrap();
    let index = fixture.open(empty.path());
    index.ensure_initialized().unwrap();
    assert_eq!(index.mode(), Mode::Primary);

    let tied = tempfile::tempdir().unwrap();
    for shard in ["shard_0", "shard_1"] {
        stamp(&tied.path().join(shard).join("primary"), 70);
        stamp(&tied.path().join(shard).join("secondary"), 70);
    }
    let fixture = Fixture::new();
    let index = fixture.open(tied.path());
    index.ensure_initialized().unwrap();
    assert_eq!(index.mode(), Mode::Primary);
}

#[test]
fn test_resolution_is_idempotent_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    fixture.crawler.insert("a", "blue jeans");

    let first = fixture.open(dir.path());
    rebuild(&first).unwrap();
    let mode = first.mode();
    drop(first);

    for _ in 0..3 {
        let reopened = fixture.open(dir.path());
        reopened.ensure_initialized().unwrap();
        assert_eq!(reopened.mode(), mode);
        assert_eq!(reopened.search("jeans", 10).unwrap().len(), 1);
    }
}

#[test]
fn test_timestamps_take_over_when_property_is_lost() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    fixture.crawler.insert("a", "green hat");

    let index = fixture.open(dir.path());
    rebuild(&index).unwrap();
    assert_eq!(index.mode(), Mode::Secondary);
    drop(index);

    fixture.store().clear_all().unwrap();
    let reopened = fixture.open(dir.path());
    reopened.ensure_initialized().unwrap();
    assert_eq!(reopened.mode(), Mode::Secondary);
    assert_eq!(fixture.persisted().0, "Secondary");
}

#[test]
fn test_rebuild_while_primary_serves_from_secondary() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    let index = fixture.open(dir.path());

    let mut context = index.update_context().unwrap();
    context.add_document(Document::new("old", "legacy catalog entry")).unwrap();
    context.commit().unwrap();
    assert_eq!(index.mode(), Mode::Primary);
    assert_eq!(index.search("legacy", 10).unwrap().len(), 1);

    fixture.crawler.insert("fresh", "new catalog entry");
    assert_eq!(rebuild(&index).unwrap(), Mode::Secondary);

    let hits = index.search("catalog", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "fresh");
    assert!(index.search("legacy", 10).unwrap().is_empty());

    let status = index.shard_status().unwrap();
    assert!(status.iter().all(|s| s.mode == Mode::Secondary));
}

#[test]
fn test_cancelled_rebuild_leaves_readers_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    fixture.crawler.insert("a", "wool scarf");
    let index = fixture.open(dir.path());
    rebuild(&index).unwrap();

    fixture.crawler.insert("b", "silk scarf");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = index.rebuild(&IndexingOptions::default(), &cancel).unwrap_err();
    assert!(matches!(err, IndexError::Cancelled));

    assert_eq!(index.mode(), Mode::Secondary);
    assert_eq!(fixture.persisted().0, "Secondary");
    assert_eq!(index.search("scarf", 10).unwrap().len(), 1);
}

#[test]
fn test_failed_populate_does_not_switch() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    let index = fixture.open(dir.path());
    let mut context = index.create_full_rebuild_context().unwrap();
    assert_eq!(context.target_mode(), Mode::Secondary);

    // a context without writers cannot accept documents
    context.reset().unwrap();
    fixture.crawler.insert("a", "linen");
    let err = index
        .do_rebuild(&mut context, &IndexingOptions::default(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, IndexError::NotInitialized(_)));
    assert_eq!(index.mode(), Mode::Primary);

    // resetting through the index reopens the writers for a retry
    index.do_reset(&mut context).unwrap();
    let summary = index
        .do_rebuild(&mut context, &IndexingOptions::default(), &CancellationToken::new())
        .unwrap();
    assert_eq!(summary.active, Mode::Secondary);
    assert_eq!(index.search("linen", 10).unwrap().len(), 1);
}

#[test]
fn test_do_reset_discards_update_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    let index = fixture.open(dir.path());

    let mut context = index.update_context().unwrap();
    context.add_document(Document::new("a", "cotton")).unwrap();
    index.do_reset(&mut context).unwrap();
    context.commit().unwrap();
    assert_eq!(index.document_count().unwrap(), 0);
}

#[test]
fn test_concurrent_rebuilds_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    fixture.crawler.insert("a", "denim");
    let index = Arc::new(fixture.open(dir.path()));
    index.ensure_initialized().unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let held = index.full_rebuild_lock().lock();

    let handle = {
        let index = Arc::clone(&index);
        let finished = Arc::clone(&finished);
        std::thread::spawn(move || {
            let mode = rebuild(&index).unwrap();
            finished.fetch_add(1, Ordering::SeqCst);
            mode
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    assert_eq!(index.mode(), Mode::Primary);
    drop(held);

    assert_eq!(handle.join().unwrap(), Mode::Secondary);
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            std::thread::spawn(move || rebuild(&index).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    // five flips in total, each exactly once
    assert_eq!(index.mode(), Mode::Secondary);
    assert_eq!(index.search("denim", 10).unwrap().len(), 1);
}

/// Wraps a crawler and parks every `discover` call until the test lets it go
struct GatedCrawler {
    inner: Arc<MemoryCrawler>,
    entered: Barrier,
    release: Barrier,
}

impl GatedCrawler {
    fn new(inner: Arc<MemoryCrawler>) -> Self {
        Self {
            inner,
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl Crawler for GatedCrawler {
    fn name(&self) -> &str {
        "gated"
    }

    fn discover(&self) -> Result<Vec<SourceItem>> {
        self.entered.wait();
        self.release.wait();
        self.inner.discover()
    }

    fn load(&self, item: &SourceItem) -> Option<Document> {
        self.inner.load(item)
    }
}

#[test]
fn test_manual_switch_waits_for_running_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    let gated = Arc::new(GatedCrawler::new(fixture.crawler.clone()));
    let mut index = DualDirectoryIndex::new(
        "products",
        dir.path(),
        IndexConfig::default(),
        IndexStores::extended(fixture.store()),
    );
    index.add_crawler(gated.clone());
    let index = Arc::new(index);

    let mut context = index.update_context().unwrap();
    context.add_document(Document::new("legacy", "old catalog")).unwrap();
    context.commit().unwrap();
    drop(context);
    fixture.crawler.insert("fresh", "new catalog");

    let rebuilder = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || rebuild(&index))
    };
    gated.entered.wait();

    let switched = Arc::new(AtomicBool::new(false));
    let switcher = {
        let index = Arc::clone(&index);
        let switched = Arc::clone(&switched);
        std::thread::spawn(move || {
            let mode = index.switch_directories();
            switched.store(true, Ordering::SeqCst);
            mode
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(!switched.load(Ordering::SeqCst));
    assert_eq!(index.mode(), Mode::Primary);
    assert_eq!(index.search("legacy", 10).unwrap().len(), 1);

    gated.release.wait();
    assert_eq!(rebuilder.join().unwrap().unwrap(), Mode::Secondary);
    // the manual switch runs after the rebuild and flips back
    assert_eq!(switcher.join().unwrap().unwrap(), Mode::Primary);

    // the serving side was never cleared by the rebuild
    assert_eq!(index.search("legacy", 10).unwrap().len(), 1);
    assert!(index.search("fresh", 10).unwrap().is_empty());

    // and the rebuilt side holds the crawled document
    index.switch_directories().unwrap();
    let hits = index.search("catalog", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "fresh");
}

#[test]
fn test_do_rebuild_refuses_target_that_is_already_serving() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    fixture.crawler.insert("a", "velvet");
    let index = fixture.open(dir.path());

    let mut context = index.create_full_rebuild_context().unwrap();
    assert_eq!(context.target_mode(), Mode::Secondary);
    index.switch_directories_to(Mode::Secondary).unwrap();

    let err = index
        .do_rebuild(&mut context, &IndexingOptions::default(), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, IndexError::RebuildTargetActive { target: Mode::Secondary, .. }));
    assert_eq!(index.mode(), Mode::Secondary);
    assert_eq!(fixture.persisted().0, "Secondary");
}

#[test]
fn test_readers_keep_working_during_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    for i in 0..200 {
        fixture.crawler.insert(format!("doc-{}", i), format!("shared token{}", i));
    }
    let index = Arc::new(fixture.open(dir.path()));
    rebuild(&index).unwrap();

    let writer = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || {
            for _ in 0..3 {
                rebuild(&index).unwrap();
            }
        })
    };

    for _ in 0..50 {
        assert_eq!(index.search("shared", 0).unwrap().len(), 200);
    }
    writer.join().unwrap();
    assert_eq!(index.mode(), Mode::Primary);
}

#[test]
fn test_incremental_updates_stay_on_active_side() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    fixture.crawler.insert("a", "leather boots");
    let index = fixture.open(dir.path());
    rebuild(&index).unwrap();

    let mut context = index.update_context().unwrap();
    context.add_document(Document::new("b", "rubber boots")).unwrap();
    context.delete_document("a").unwrap();
    context.commit().unwrap();

    let hits = index.search("boots", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "b");

    // the next rebuild only knows what the crawler knows
    rebuild(&index).unwrap();
    let hits = index.search("boots", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a");
}

#[test]
fn test_commit_policy_executor_is_cloned_per_context() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture::new();
    for i in 0..10 {
        fixture.crawler.insert(format!("{}", i), "sock");
    }
    let index = fixture
        .open(dir.path())
        .with_commit_executor(CommitPolicyExecutor::new(CommitPolicy::EveryN(3)));

    let context = index.create_full_rebuild_context().unwrap();
    assert_eq!(context.executor().index_name(), Some("products"));
    assert_eq!(context.executor().commits(), 0);
    drop(context);

    assert_eq!(rebuild(&index).unwrap(), Mode::Secondary);
    assert_eq!(index.document_count().unwrap(), 10);
}

#[test]
fn test_corrupt_manifest_aborts_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let secondary = dir.path().join("shard_1").join("secondary");
    std::fs::create_dir_all(&secondary).unwrap();
    std::fs::write(secondary.join("segments.json"), b"{not json").unwrap();

    let fixture = Fixture::new();
    let index = fixture.open(dir.path());
    let err = index.ensure_initialized().unwrap_err();
    assert!(matches!(err, IndexError::Corrupt { .. }));
    assert!(!index.is_initialized());
}

/// Records which post-actions the index hands to the extended store
struct RecordingStore {
    inner: IndexPropertyStore,
    plain_calls: AtomicUsize,
    extended_calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl PropertyStore for RecordingStore {
    fn get(&self, key: &str) -> Result<String> {
        self.plain_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.plain_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn add(&self, key: &str, value: &str) -> Result<()> {
        self.inner.add(key, value)
    }

    fn clear_prefix(&self, prefix: &str) -> Result<()> {
        self.inner.clear_prefix(prefix)
    }

    fn clear_all(&self) -> Result<()> {
        self.inner.clear_all()
    }
}

impl PropertyStoreEx for RecordingStore {
    fn add_with(&self, key: &str, value: &str, post_action: PostAction<'_>) -> Result<()> {
        self.extended_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add_with(key, value, post_action)
    }

    fn set_with(&self, key: &str, value: &str, post_action: PostAction<'_>) -> Result<()> {
        self.extended_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(key.to_string());
        self.inner.set_with(key, value, post_action)
    }

    fn get_with(&self, key: &str, post_action: PostAction<'_>) -> Result<String> {
        self.extended_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_with(key, post_action)
    }
}

fn recording_store() -> Arc<RecordingStore> {
    Arc::new(RecordingStore {
        inner: IndexPropertyStore::new("default")
            .with_key("products")
            .with_backend(MemoryBackend::new()),
        plain_calls: AtomicUsize::new(0),
        extended_calls: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    })
}

#[test]
fn test_extended_store_is_preferred_when_supplied() {
    let dir = tempfile::tempdir().unwrap();
    let store = recording_store();
    let index = DualDirectoryIndex::new(
        "products",
        dir.path(),
        IndexConfig::default(),
        IndexStores::extended(store.clone()),
    );
    index.ensure_initialized().unwrap();

    assert_eq!(store.plain_calls.load(Ordering::SeqCst), 0);
    assert!(store.extended_calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(
        *store.seen.lock(),
        vec![
            IndexProperties::READ_UPDATE_DIRECTORY.to_string(),
            IndexProperties::FULL_REBUILD_DIRECTORY.to_string(),
        ]
    );
}

#[test]
fn test_plain_store_used_otherwise() {
    let dir = tempfile::tempdir().unwrap();
    let store = recording_store();
    let index = DualDirectoryIndex::new(
        "products",
        dir.path(),
        IndexConfig::default(),
        IndexStores::plain(store.clone()),
    );
    index.ensure_initialized().unwrap();

    assert_eq!(store.extended_calls.load(Ordering::SeqCst), 0);
    assert!(store.plain_calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(store.get(IndexProperties::READ_UPDATE_DIRECTORY).unwrap(), "Primary");
}

/// Writes straight to a backend, leaving event suppression to the caller
struct DirectStore {
    backend: Arc<MemoryBackend>,
}

impl PropertyStore for DirectStore {
    fn get(&self, key: &str) -> Result<String> {
        Ok(self.backend.read(key)?.unwrap_or_default())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.backend.write(key, value)
    }

    fn add(&self, key: &str, value: &str) -> Result<()> {
        let existing = self.get(key)?;
        if existing.is_empty() {
            self.set(key, value)
        } else {
            self.set(key, &format!("{},{}", existing, value))
        }
    }

    fn clear_prefix(&self, prefix: &str) -> Result<()> {
        self.backend.remove_prefix(prefix).map(|_| ())
    }

    fn clear_all(&self) -> Result<()> {
        self.clear_prefix("")
    }
}

#[test]
fn test_switch_bookkeeping_raises_no_change_events() {
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::new();
    let changes = Arc::new(AtomicUsize::new(0));
    {
        let changes = Arc::clone(&changes);
        events.subscribe(move |event| {
            if matches!(event, PropertyEvent::Changed { .. }) {
                changes.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let backend = MemoryBackend::with_events(events);
    let store = Arc::new(DirectStore {
        backend: backend.clone(),
    });
    let crawler = Arc::new(MemoryCrawler::new("memory"));
    crawler.insert("a", "cap");
    let mut index = DualDirectoryIndex::new("products", dir.path(), IndexConfig::default(), IndexStores::plain(store));
    index.add_crawler(crawler);

    rebuild(&index).unwrap();
    index.switch_directories().unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 0);
    assert!(!property_events_suppressed());
    assert_eq!(
        backend.read(IndexProperties::READ_UPDATE_DIRECTORY).unwrap().as_deref(),
        Some("Primary")
    );

    // writes outside the index's bookkeeping do notify
    backend.write("unrelated", "1").unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 1);
}
