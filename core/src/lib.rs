//! Core library for confpush
//!
//! Shared types, settings, the error taxonomy, and the device-facing building
//! blocks of the deployment pipeline: sessions, device operations, credential
//! resolution and snapshot files.

pub mod deploy;
pub mod error;
pub mod secrets;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use deploy::{output_indicates_failure, DeviceOps, VerifyResult};
pub use error::{Error, ErrorKind, Result};
pub use secrets::SecretsResolver;
pub use session::{DeviceSession, SessionFactory, SshSessionFactory};
pub use settings::Settings;
pub use snapshot::SnapshotStore;
pub use types::{
    CommandResult, Credentials, DeployTask, DeviceTarget, ExecutionOutcome, FailureReason,
    OutcomeStatus, PlatformKind,
};
