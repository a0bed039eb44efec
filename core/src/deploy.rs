//! Device operations used by the deployment pipeline
//!
//! Each operation opens its own session and never returns an error: failures
//! are folded into a [`CommandResult`] whose exit code is `2` for timeouts and
//! authentication failures and `1` for anything else.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::{CommandResult, Credentials, DeviceTarget, SessionFactory};

/// Result of running verification commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub passed: bool,
    pub output: String,
}

/// Error-token heuristic applied to verification output
pub fn output_indicates_failure(output: &str) -> bool {
    let lowered = output.to_lowercase();
    lowered.contains("error") || lowered.contains("invalid") || output.contains("% ")
}

/// Snapshot, apply and verify primitives over a [`SessionFactory`]
#[derive(Clone)]
pub struct DeviceOps {
    sessions: Arc<dyn SessionFactory>,
}

impl DeviceOps {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self { sessions }
    }

    /// Read the device's full running configuration
    pub async fn fetch_running_config(
        &self,
        device: &DeviceTarget,
        credentials: &Credentials,
    ) -> CommandResult {
        let command = device.platform.show_config_command();
        debug!(device = %device.name, command, "Fetching running configuration");

        let session = match self.sessions.open(device, credentials).await {
            Ok(session) => session,
            Err(e) => return CommandResult::failed(e.device_exit_code(), format!("session error: {}", e)),
        };

        match session.send_command(command).await {
            Ok(result) => result,
            Err(e) => CommandResult::failed(e.device_exit_code(), format!("session error: {}", e)),
        }
    }

    /// Push configuration lines to the device
    pub async fn apply_config(
        &self,
        device: &DeviceTarget,
        credentials: &Credentials,
        config_lines: &[String],
    ) -> CommandResult {
        debug!(device = %device.name, lines = config_lines.len(), "Applying configuration");

        let session = match self.sessions.open(device, credentials).await {
            Ok(session) => session,
            Err(e) => return CommandResult::failed(e.device_exit_code(), format!("session error: {}", e)),
        };

        match session.send_config_set(config_lines).await {
            Ok(result) => result,
            Err(e) => CommandResult::failed(e.device_exit_code(), format!("session error: {}", e)),
        }
    }

    /// Run read-only verification commands and judge the combined output
    pub async fn verify_config(
        &self,
        device: &DeviceTarget,
        credentials: &Credentials,
        verify_commands: &[String],
    ) -> VerifyResult {
        let session = match self.sessions.open(device, credentials).await {
            Ok(session) => session,
            Err(e) => {
                return VerifyResult {
                    passed: false,
                    output: format!("verify error: {}", e),
                }
            }
        };

        let mut outputs = Vec::with_capacity(verify_commands.len());
        for command in verify_commands {
            match session.send_command(command).await {
                Ok(result) => outputs.push(format!("$ {}\n{}\n", command, result.output)),
                Err(e) => {
                    warn!(device = %device.name, command = %command, error = %e, "Verify command failed");
                    outputs.push(format!("$ {}\n", command));
                    return VerifyResult {
                        passed: false,
                        output: format!("{}\nverify error: {}", outputs.join("\n"), e),
                    };
                }
            }
        }

        let combined = outputs.join("\n");
        VerifyResult {
            passed: !output_indicates_failure(&combined),
            output: combined,
        }
    }
}
