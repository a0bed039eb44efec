//! Database query modules

pub mod audit;
pub mod devices;
pub mod jobs;
pub mod logs;
pub mod queued_tasks;
pub mod snapshots;

// Re-export commonly used functions for convenience
pub use audit::*;
pub use devices::*;
pub use jobs::*;
pub use logs::*;
pub use queued_tasks::*;
pub use snapshots::*;
