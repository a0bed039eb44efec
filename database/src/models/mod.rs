// Database models

pub mod audit;
pub mod device;
pub mod job;
pub mod queued_task;
pub mod snapshot;

pub use audit::*;
pub use device::*;
pub use job::*;
pub use queued_task::*;
pub use snapshot::*;
