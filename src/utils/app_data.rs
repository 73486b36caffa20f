use crate::index::commit::CommitPolicy;
use crate::index::types::IndexConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "dualdex";
const CONFIG_FILE: &str = "config.json";
const PROPERTIES_FILE: &str = "properties.json";
const INDEXES_DIR: &str = "indexes";

/// Environment variable overriding the app data directory
pub const HOME_ENV: &str = "DUALDEX_HOME";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Number of shards for newly created indexes
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,

    /// Instance qualifier in property keys (`{index}_{instance}_{name}`)
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Commit after this many buffered documents; 0 commits only at the end
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,

    /// Files larger than this are not indexed
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Glob patterns excluded from crawling
    #[serde(default = "default_ignored_paths")]
    pub ignored_paths: Vec<String>,

    /// Documents processed in parallel per rebuild batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_shard_count() -> u32 {
    2
}

fn default_instance_name() -> String {
    "default".to_string()
}

fn default_commit_every() -> usize {
    0
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_ignored_paths() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ]
}

fn default_batch_size() -> usize {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            instance_name: default_instance_name(),
            commit_every: default_commit_every(),
            max_file_size: default_max_file_size(),
            ignored_paths: default_ignored_paths(),
            batch_size: default_batch_size(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: AppConfig = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the app data directory
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        match self.commit_every {
            0 => CommitPolicy::Manual,
            1 => CommitPolicy::EveryDocument,
            n => CommitPolicy::EveryN(n),
        }
    }

    /// Engine settings derived from this config
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            shard_count: self.shard_count.max(1),
            commit_policy: self.commit_policy(),
            ..IndexConfig::default()
        }
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join(CONFIG_FILE))
}

/// Get the path to the shared property store
pub fn get_properties_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join(PROPERTIES_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let app_dir = match std::env::var_os(HOME_ENV) {
        Some(home) => PathBuf::from(home),
        None => {
            let base = if cfg!(target_os = "macos") {
                dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
            } else if cfg!(target_os = "windows") {
                dirs::data_local_dir()
            } else {
                dirs::data_dir()
            };
            base.context("Could not determine app data directory")?
                .join(APP_NAME)
        }
    };

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Get the storage folder for a named index
pub fn get_index_dir(name: &str) -> Result<PathBuf> {
    validate_index_name(name)?;
    let indexes_dir = get_app_data_dir()?.join(INDEXES_DIR);
    fs::create_dir_all(&indexes_dir)?;
    Ok(indexes_dir.join(name))
}

/// Index names become directory names and property keys
pub fn validate_index_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        anyhow::bail!(
            "Invalid index name '{}': use letters, digits, '-' or '.'",
            name
        );
    }
    Ok(())
}

/// List names of all indexes on disk
pub fn list_index_names() -> Result<Vec<String>> {
    let indexes_dir = get_app_data_dir()?.join(INDEXES_DIR);
    if !indexes_dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(&indexes_dir)? {
        let entry = entry?;
        if entry.path().is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Remove an index folder
pub fn remove_index_dir(name: &str) -> Result<bool> {
    let index_dir = get_index_dir(name)?;
    if index_dir.exists() {
        fs::remove_dir_all(&index_dir)
            .with_context(|| format!("Failed to remove {}", index_dir.display()))?;
        return Ok(true);
    }
    Ok(false)
}

/// Total size of a directory tree in bytes
pub fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    if path.is_dir() {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                size += entry.metadata()?.len();
            } else if path.is_dir() {
                size += dir_size(&path)?;
            }
        }
    }
    Ok(size)
}
