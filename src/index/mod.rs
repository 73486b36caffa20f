pub mod cancel;
pub mod commit;
pub mod context;
pub mod crawler;
pub mod directory;
pub mod dual;
pub mod mode;
pub mod reader;
pub mod shard;
pub mod stats;
pub mod types;
pub mod writer;

pub use cancel::CancellationToken;
pub use commit::{CommitPolicy, CommitPolicyExecutor};
pub use context::{ProviderContext, RebuildContext, UpdateContext};
pub use crawler::{Crawler, FsCrawler, MemoryCrawler, SourceItem};
pub use directory::IndexDirectory;
pub use dual::DualDirectoryIndex;
pub use mode::{ModeResolution, ModeSource, RebuildModeTracker};
pub use reader::ShardReader;
pub use shard::{Shard, ShardDirectoryPair};
pub use types::*;
pub use writer::SegmentWriter;
