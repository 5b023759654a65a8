pub mod polling;
pub mod process_tracker;

pub use polling::{PollLoop, PollStats, PublisherCache, SnapshotSource};
pub use process_tracker::ProcessTracker;
