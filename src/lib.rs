//! # dualdex - switch-on-rebuild search index
//!
//! dualdex keeps two physical copies of every shard of a full-text index.
//! Queries and incremental updates go to the active copy while a full
//! rebuild writes a fresh index into the standby copy. When the rebuild
//! completes the whole index switches to the fresh copy at once; a failed
//! or cancelled rebuild leaves readers on the old one.
//!
//! ## Architecture
//!
//! - [`index`] - shards, segments, mode tracking and the dual-directory index
//! - [`store`] - property storage that persists which copy is active
//! - [`events`] - property change notifications and their suppression
//! - [`output`] - terminal formatting for the CLI
//! - [`utils`] - tokenizer, encoding, app data and progress helpers
//!
//! ## Quick Start
//!
//! ```ignore
//! use dualdex::index::{CancellationToken, DualDirectoryIndex, IndexConfig, IndexingOptions, MemoryCrawler};
//! use dualdex::store::{IndexPropertyStore, IndexStores, MemoryBackend};
//! use std::sync::Arc;
//!
//! let store = Arc::new(
//!     IndexPropertyStore::new("default")
//!         .with_key("docs")
//!         .with_backend(MemoryBackend::new()),
//! );
//! let mut index = DualDirectoryIndex::new("docs", "/tmp/docs", IndexConfig::default(), IndexStores::extended(store));
//!
//! let crawler = Arc::new(MemoryCrawler::new("memory"));
//! crawler.insert("readme", "switch on rebuild");
//! index.add_crawler(crawler);
//!
//! index.rebuild(&IndexingOptions::default(), &CancellationToken::new())?;
//! for hit in index.search("rebuild", 10)? {
//!     println!("{} ({})", hit.id, hit.score);
//! }
//! ```

pub mod error;
pub mod events;
pub mod index;
pub mod output;
pub mod store;
pub mod utils;

pub use error::{IndexError, Result};
