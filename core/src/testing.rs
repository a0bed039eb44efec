//! Scripted in-memory device sessions for tests
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream crates' tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::{
    CommandResult, Credentials, DeviceSession, DeviceTarget, Error, Result, SessionFactory,
};

#[derive(Default)]
struct DeviceState {
    running_config: String,
    responses: HashMap<String, CommandResult>,
    apply_results: VecDeque<CommandResult>,
    open_failure: Option<(i32, String)>,
    commands: Vec<String>,
    applied: Vec<Vec<String>>,
    opens: usize,
}

/// A fake device whose responses are scripted up front
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl ScriptedDevice {
    pub fn new(running_config: impl Into<String>) -> Self {
        let device = Self::default();
        device.lock().running_config = running_config.into();
        device
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer `command` with `output` and exit code 0
    pub fn respond(&self, command: &str, output: &str) {
        self.respond_with(command, CommandResult::ok(output));
    }

    pub fn respond_with(&self, command: &str, result: CommandResult) {
        self.lock().responses.insert(command.to_string(), result);
    }

    /// Result for the next config push; pushes default to exit code 0
    pub fn queue_apply(&self, result: CommandResult) {
        self.lock().apply_results.push_back(result);
    }

    /// Make every session open fail with `err`
    pub fn fail_open(&self, err: Error) {
        self.lock().open_failure = Some((err.device_exit_code(), err.to_string()));
    }

    /// Commands sent with `send_command`, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Config sets pushed with `send_config_set`, in order
    pub fn applied(&self) -> Vec<Vec<String>> {
        self.lock().applied.clone()
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }
}

#[async_trait]
impl DeviceSession for ScriptedDevice {
    async fn send_command(&self, command: &str) -> Result<CommandResult> {
        let mut state = self.lock();
        state.commands.push(command.to_string());

        if let Some(result) = state.responses.get(command) {
            return Ok(result.clone());
        }
        if command.starts_with("show running-config") || command.starts_with("show configuration")
        {
            return Ok(CommandResult::ok(state.running_config.clone()));
        }
        Ok(CommandResult::ok(""))
    }

    async fn send_config_set(&self, lines: &[String]) -> Result<CommandResult> {
        let mut state = self.lock();
        state.applied.push(lines.to_vec());
        Ok(state
            .apply_results
            .pop_front()
            .unwrap_or_else(|| CommandResult::ok(format!("applied {} lines", lines.len()))))
    }
}

/// Session factory handing out sessions to one scripted device
pub struct ScriptedSessions {
    device: ScriptedDevice,
}

impl ScriptedSessions {
    pub fn new(device: ScriptedDevice) -> Self {
        Self { device }
    }

    pub fn shared(device: ScriptedDevice) -> Arc<dyn SessionFactory> {
        Arc::new(Self::new(device))
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessions {
    async fn open(
        &self,
        _device: &DeviceTarget,
        _credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>> {
        let failure = {
            let mut state = self.device.lock();
            state.opens += 1;
            state.open_failure.clone()
        };

        match failure {
            Some((2, message)) => Err(Error::SessionTimeout(message)),
            Some((_, message)) => Err(Error::RemoteExecutionError(message)),
            None => Ok(Box::new(self.device.clone())),
        }
    }
}
