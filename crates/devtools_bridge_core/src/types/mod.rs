pub mod endpoint;
pub mod entry;
pub mod feed;
pub mod summary;

pub use endpoint::{DebugEndpoint, TargetInfo, VersionInfo};
pub use entry::{CapturedEntry, EntryTimestamp, Level, LogEntry, RawLine};
pub use feed::{ConsoleLine, FeedEvent, UncaughtError};
pub use summary::{Summary, SummaryStats};
