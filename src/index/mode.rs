use crate::error::Result;
use crate::index::directory::IndexDirectory;
use crate::index::shard::Shard;
use crate::index::types::Mode;

/// Timestamp used for a location that has never been committed to
pub const NO_SEGMENTS_TIMESTAMP: i64 = i64::MIN;

/// Where a resolved mode came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSource {
    /// The persisted `ReadUpdateDirectory` property
    Property,
    /// Newest commit across all primary vs all secondary locations
    Timestamps { primary: i64, secondary: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeResolution {
    pub mode: Mode,
    pub source: ModeSource,
}

/// Decides which side of every shard pair is active when an index starts.
///
/// The persisted property is authoritative when it holds a valid mode.
/// Otherwise the side with the most recent commit wins, ties going to
/// Primary so that two equally fresh (or equally empty) sides resolve the
/// same way on every start.
pub struct RebuildModeTracker<'a> {
    index_name: &'a str,
}

impl<'a> RebuildModeTracker<'a> {
    pub fn new(index_name: &'a str) -> Self {
        Self { index_name }
    }

    pub fn resolve(&self, persisted: &str, shards: &[Shard]) -> Result<ModeResolution> {
        if let Some(mode) = self.from_property(persisted) {
            return Ok(ModeResolution {
                mode,
                source: ModeSource::Property,
            });
        }
        self.from_timestamps(shards)
    }

    pub fn from_property(&self, persisted: &str) -> Option<Mode> {
        if persisted.is_empty() {
            return None;
        }
        log::debug!(
            "[Index={}] Resolving directories from index property store",
            self.index_name
        );
        match persisted.parse::<Mode>() {
            Ok(mode) => Some(mode),
            Err(e) => {
                log::warn!("[Index={}] Ignoring persisted directory: {}", self.index_name, e);
                None
            }
        }
    }

    pub fn from_timestamps(&self, shards: &[Shard]) -> Result<ModeResolution> {
        log::debug!(
            "[Index={}] Resolving directories by last time modified",
            self.index_name
        );

        let mut latest_primary = NO_SEGMENTS_TIMESTAMP;
        let mut latest_secondary = NO_SEGMENTS_TIMESTAMP;

        for shard in shards {
            let primary = location_timestamp(shard.directories().primary())?;
            let secondary = location_timestamp(shard.directories().secondary())?;

            log::debug!(
                "[Index={}, Shard={}] Primary directory last modified = '{}'",
                self.index_name,
                shard,
                primary
            );
            log::debug!(
                "[Index={}, Shard={}] Secondary directory last modified = '{}'",
                self.index_name,
                shard,
                secondary
            );

            latest_primary = latest_primary.max(primary);
            latest_secondary = latest_secondary.max(secondary);
        }

        let mode = if latest_primary >= latest_secondary {
            Mode::Primary
        } else {
            Mode::Secondary
        };

        Ok(ModeResolution {
            mode,
            source: ModeSource::Timestamps {
                primary: latest_primary,
                secondary: latest_secondary,
            },
        })
    }
}

/// Last commit time of a location; "no segments" is the earliest possible
/// time, any other failure is returned.
pub fn location_timestamp(directory: &IndexDirectory) -> Result<i64> {
    match directory.last_modified() {
        Err(e) if e.is_no_segments() => Ok(NO_SEGMENTS_TIMESTAMP),
        other => other,
    }
}
