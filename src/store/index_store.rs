use crate::error::{IndexError, Result};
use crate::events::{EventBus, PropertyChangedEventDisabler, PropertyEvent};
use crate::store::{PostAction, PropertyBackend, PropertyStore, PropertyStoreEx, noop_post_action};
use std::sync::Arc;

/// Property store scoped to one index.
///
/// Every property is stored under `"{key}_{instance}_{name}"`. Mutations run
/// with property-changed events suppressed (unless that is switched off), and
/// list appends publish an explicit `indexing:propertyadd` event.
///
/// Empty reads are not cached: every `get` goes to the backend.
pub struct IndexPropertyStore {
    key: Option<String>,
    instance_name: String,
    backend: Option<Arc<dyn PropertyBackend>>,
    events: Arc<EventBus>,
    suppress_property_changed_events: bool,
}

impl IndexPropertyStore {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            key: None,
            instance_name: instance_name.into(),
            backend: None,
            events: EventBus::new(),
            suppress_property_changed_events: true,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn PropertyBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn suppress_property_changed_events(mut self, suppress: bool) -> Self {
        self.suppress_property_changed_events = suppress;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// `"{key}_{instance}"`
    pub fn master_key(&self) -> Result<String> {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => Ok(format!("{}_{}", key, self.instance_name)),
            _ => Err(IndexError::Config("property store key is not set".to_string())),
        }
    }

    /// Fully qualified key for a logical property name
    pub fn resolve_key(&self, name: &str) -> Result<String> {
        Ok(format!("{}_{}", self.master_key()?, name))
    }

    fn backend(&self) -> Result<&Arc<dyn PropertyBackend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| IndexError::Config("property store backend is not set".to_string()))
    }

    fn disabler(&self) -> PropertyChangedEventDisabler {
        PropertyChangedEventDisabler::new(self.suppress_property_changed_events)
    }

    /// All entries owned by this store, with the master key prefix stripped
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let prefix = format!("{}_", self.master_key()?);
        Ok(self
            .backend()?
            .entries()?
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|name| (name.to_string(), value))
            })
            .collect())
    }
}

impl PropertyStore for IndexPropertyStore {
    fn get(&self, key: &str) -> Result<String> {
        self.get_with(key, &noop_post_action)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_with(key, value, &noop_post_action)
    }

    fn add(&self, key: &str, value: &str) -> Result<()> {
        self.add_with(key, value, &noop_post_action)
    }

    fn clear_prefix(&self, prefix: &str) -> Result<()> {
        let resolved = self.resolve_key(prefix)?;
        let backend = self.backend()?;
        let _events = self.disabler();
        backend.remove_prefix(&resolved)?;
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let prefix = format!("{}_", self.master_key()?);
        let backend = self.backend()?;
        let _events = self.disabler();
        backend.remove_prefix(&prefix)?;
        Ok(())
    }
}

impl PropertyStoreEx for IndexPropertyStore {
    fn add_with(&self, key: &str, value: &str, post_action: PostAction<'_>) -> Result<()> {
        let resolved = self.resolve_key(key)?;
        let backend = self.backend()?;
        let existing = backend.read(&resolved)?.unwrap_or_default();
        {
            let _events = self.disabler();
            if existing.is_empty() {
                backend.write(&resolved, value)?;
            } else {
                backend.write(&resolved, &format!("{},{}", existing, value))?;
            }
        }
        self.events.raise(&PropertyEvent::Added {
            key: resolved.clone(),
            value: value.to_string(),
        });
        post_action(&resolved, value);
        Ok(())
    }

    fn set_with(&self, key: &str, value: &str, post_action: PostAction<'_>) -> Result<()> {
        let resolved = self.resolve_key(key)?;
        let backend = self.backend()?;
        {
            let _events = self.disabler();
            backend.write(&resolved, value)?;
        }
        post_action(&resolved, value);
        Ok(())
    }

    fn get_with(&self, key: &str, post_action: PostAction<'_>) -> Result<String> {
        let resolved = self.resolve_key(key)?;
        let value = self.backend()?.read(&resolved)?.unwrap_or_default();
        post_action(&resolved, &value);
        Ok(value)
    }
}

impl std::fmt::Debug for IndexPropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexPropertyStore")
            .field("key", &self.key)
            .field("instance_name", &self.instance_name)
            .field("suppress_property_changed_events", &self.suppress_property_changed_events)
            .finish()
    }
}
