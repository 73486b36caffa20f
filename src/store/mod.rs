//! Key/value property storage used to persist index bookkeeping.
//!
//! - [`PropertyStore`] - the plain contract the index needs
//! - [`PropertyStoreEx`] - optional extension taking a post-action callback
//! - [`backend`] - raw storage (in-memory or a JSON file on disk)
//! - [`index_store`] - per-index namespacing on top of a backend

pub mod backend;
pub mod index_store;

pub use backend::{FileBackend, MemoryBackend, PropertyBackend};
pub use index_store::IndexPropertyStore;

use crate::error::Result;
use std::sync::Arc;

/// Callback invoked after an extended-store operation with `(resolved_key, value)`
pub type PostAction<'a> = &'a dyn Fn(&str, &str);

/// Post action that does nothing
pub fn noop_post_action(_key: &str, _value: &str) {}

pub trait PropertyStore: Send + Sync {
    /// Returns the stored value, or an empty string when absent
    fn get(&self, key: &str) -> Result<String>;

    /// Overwrites the value by key
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Appends a value to a comma-separated list property
    fn add(&self, key: &str, value: &str) -> Result<()>;

    /// Removes every property whose name starts with `prefix`
    fn clear_prefix(&self, prefix: &str) -> Result<()>;

    /// Removes every property owned by this store
    fn clear_all(&self) -> Result<()>;
}

pub trait PropertyStoreEx: Send + Sync {
    fn add_with(&self, key: &str, value: &str, post_action: PostAction<'_>) -> Result<()>;

    fn set_with(&self, key: &str, value: &str, post_action: PostAction<'_>) -> Result<()>;

    fn get_with(&self, key: &str, post_action: PostAction<'_>) -> Result<String>;
}

/// The property store handed to an index, with the extended capability
/// decided once at construction.
#[derive(Clone)]
pub struct IndexStores {
    plain: Arc<dyn PropertyStore>,
    extended: Option<Arc<dyn PropertyStoreEx>>,
}

impl IndexStores {
    pub fn plain(store: Arc<dyn PropertyStore>) -> Self {
        Self {
            plain: store,
            extended: None,
        }
    }

    pub fn extended<S>(store: Arc<S>) -> Self
    where
        S: PropertyStore + PropertyStoreEx + 'static,
    {
        Self {
            plain: store.clone(),
            extended: Some(store),
        }
    }

    pub fn store(&self) -> &dyn PropertyStore {
        self.plain.as_ref()
    }

    pub fn extended_store(&self) -> Option<&dyn PropertyStoreEx> {
        self.extended.as_deref()
    }
}

impl std::fmt::Debug for IndexStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStores")
            .field("extended", &self.extended.is_some())
            .finish()
    }
}
