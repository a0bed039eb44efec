//! Device sessions over SSH
//!
//! A session is opened per device operation, authenticated with materialized
//! credentials, and used to exchange commands for text/exit-code results.
//! The engine only sees the [`SessionFactory`] and [`DeviceSession`] traits.

use async_ssh2_tokio::{client::Client, AuthMethod, ServerCheckMethod};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::{CommandResult, Credentials, DeviceTarget, Error, PlatformKind, Result};

/// An authenticated session to one device
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Run a single read-only command
    async fn send_command(&self, command: &str) -> Result<CommandResult>;

    /// Push a set of configuration lines
    async fn send_config_set(&self, lines: &[String]) -> Result<CommandResult>;
}

/// Opens sessions to devices
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(
        &self,
        device: &DeviceTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>>;
}

/// SSH session factory backed by `async-ssh2-tokio`
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    timeout: Duration,
}

impl SshSessionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SshSessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    #[instrument(skip(self, credentials), fields(device = %device.display()))]
    async fn open(
        &self,
        device: &DeviceTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>> {
        let auth_method = auth_method(credentials)?;

        let client = match tokio::time::timeout(
            self.timeout,
            Client::connect(
                (device.host.clone(), device.port),
                &credentials.username,
                auth_method,
                ServerCheckMethod::NoCheck,
            ),
        )
        .await
        {
            Err(_) => {
                return Err(Error::SessionTimeout(format!(
                    "connecting to {} timed out after {} seconds",
                    device.display(),
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(e)) => return Err(map_ssh_error(device, e)),
            Ok(Ok(client)) => client,
        };

        info!(username = %credentials.username, "SSH session established");

        Ok(Box::new(SshDeviceSession {
            client,
            device: device.clone(),
            timeout: self.timeout,
        }))
    }
}

fn auth_method(credentials: &Credentials) -> Result<AuthMethod> {
    if let Some(key_path) = &credentials.private_key_path {
        if !std::path::Path::new(key_path).exists() {
            return Err(Error::AuthenticationError(format!(
                "SSH key not found: {}",
                key_path
            )));
        }
        return Ok(AuthMethod::with_key_file(key_path, None));
    }

    match &credentials.password {
        Some(password) => Ok(AuthMethod::with_password(password)),
        None => Err(Error::AuthenticationError(format!(
            "no password or key available for user {}",
            credentials.username
        ))),
    }
}

fn map_ssh_error(device: &DeviceTarget, err: async_ssh2_tokio::Error) -> Error {
    match err {
        async_ssh2_tokio::Error::PasswordWrong | async_ssh2_tokio::Error::KeyAuthFailed => {
            Error::AuthenticationError(format!("{}: {}", device.display(), err))
        }
        other => Error::RemoteExecutionError(format!("{}: {}", device.display(), other)),
    }
}

/// Wrap configuration lines in the platform's config-mode framing
pub fn config_script(platform: PlatformKind, lines: &[String]) -> String {
    let body = lines.join("\n");
    match platform {
        PlatformKind::CiscoIos => format!("configure terminal\n{}\nend", body),
        PlatformKind::JuniperJunos => format!("configure\n{}\ncommit and-quit", body),
        PlatformKind::Generic => body,
    }
}

struct SshDeviceSession {
    client: Client,
    device: DeviceTarget,
    timeout: Duration,
}

impl SshDeviceSession {
    async fn exec(&self, command: &str) -> Result<CommandResult> {
        let result = tokio::time::timeout(self.timeout, self.client.execute(command))
            .await
            .map_err(|_| {
                Error::SessionTimeout(format!(
                    "command on {} timed out after {} seconds",
                    self.device.display(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| map_ssh_error(&self.device, e))?;

        let exit_code = result.exit_status as i32;
        debug!(
            device = %self.device.name,
            exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "Command completed"
        );

        let mut output = result.stdout;
        if !result.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&result.stderr);
        }

        Ok(CommandResult { exit_code, output })
    }
}

#[async_trait]
impl DeviceSession for SshDeviceSession {
    async fn send_command(&self, command: &str) -> Result<CommandResult> {
        self.exec(command).await
    }

    async fn send_config_set(&self, lines: &[String]) -> Result<CommandResult> {
        let script = config_script(self.device.platform, lines);
        self.exec(&script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_script_framing() {
        let set = lines(&["interface Gi0/1", " description uplink"]);

        assert_eq!(
            config_script(PlatformKind::CiscoIos, &set),
            "configure terminal\ninterface Gi0/1\n description uplink\nend"
        );
        assert_eq!(
            config_script(PlatformKind::JuniperJunos, &lines(&["set system host-name r1"])),
            "configure\nset system host-name r1\ncommit and-quit"
        );
        assert_eq!(
            config_script(PlatformKind::Generic, &set),
            "interface Gi0/1\n description uplink"
        );
    }

    #[test]
    fn test_auth_method_requires_secret() {
        let creds = Credentials {
            username: "netops".into(),
            ..Credentials::default()
        };
        assert!(matches!(
            auth_method(&creds),
            Err(Error::AuthenticationError(_))
        ));

        let creds = Credentials {
            username: "netops".into(),
            private_key_path: Some("/nonexistent/id_ed25519".into()),
            ..Credentials::default()
        };
        assert!(matches!(
            auth_method(&creds),
            Err(Error::AuthenticationError(_))
        ));
    }
}
