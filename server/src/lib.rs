//! Shared setup for the confpush binaries

pub mod state;
pub mod telemetry;

pub use state::AppState;
