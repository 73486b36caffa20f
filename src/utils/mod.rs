//! Utility functions shared across the crate.
//!
//! - [`app_data`] - app data directory, config file, index folders
//! - [`encoding`] - varint and postings encoding for segment files
//! - [`progress`] - optional progress bars for rebuilds
//! - [`tokenizer`] - term extraction with occurrence counts

pub mod app_data;
pub mod encoding;
pub mod progress;
pub mod tokenizer;

pub use app_data::*;
pub use encoding::*;
pub use tokenizer::*;

/// Heuristic binary detection on the first 8KB: any NUL byte, or a high
/// share of control characters.
pub fn is_binary(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(8192)];
    if memchr::memchr(0, sample).is_some() {
        return true;
    }

    let control = sample
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();
    !sample.is_empty() && control * 10 > sample.len()
}
