//! Command channel to the remote provisioning host.

use crate::error::{ProvisionError, ProvisionResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Executable allowed on the remote host unless configured otherwise.
pub const DEFAULT_REMOTE_COMMAND: &str = "/usr/local/bin/wg-provision";

/// Runs the allow-listed provisioning command on a remote host.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Runs the remote command with `args` and returns its stdout.
    async fn execute(&self, args: &[String]) -> ProvisionResult<Vec<u8>>;

    /// Releases any connection held by the channel.
    async fn close(&self) -> ProvisionResult<()>;
}

/// Rejects arguments that contain control characters.
pub fn check_argument(arg: &str) -> ProvisionResult<()> {
    if arg.chars().any(char::is_control) {
        return Err(ProvisionError::Validation(format!(
            "argument {arg:?} contains control characters"
        )));
    }
    Ok(())
}

/// Quotes `arg` as a single POSIX shell word.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Connection settings for [`SshChannel`].
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
    /// Enables strict host key checking against this file.
    pub known_hosts: Option<PathBuf>,
    /// Control socket for connection reuse.
    pub control_path: Option<PathBuf>,
    pub command: String,
    pub connect_timeout_secs: u32,
}

impl SshConfig {
    /// Settings with port 22, the default command and no host pinning.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: key_path.into(),
            known_hosts: None,
            control_path: None,
            command: DEFAULT_REMOTE_COMMAND.to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Runs the remote command through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshChannel {
    config: SshConfig,
}

impl SshChannel {
    pub fn new(config: SshConfig) -> ProvisionResult<Self> {
        for (field, value) in [
            ("host", config.host.as_str()),
            ("user", config.user.as_str()),
            ("command", config.command.as_str()),
        ] {
            let bad = value.is_empty()
                || value.starts_with('-')
                || value.chars().any(|c| c.is_control() || c.is_whitespace());
            if bad {
                return Err(ProvisionError::FatalStartup(format!(
                    "invalid ssh {field}: {value:?}"
                )));
            }
        }
        if config.port == 0 {
            return Err(ProvisionError::FatalStartup(
                "ssh port must be non-zero".to_string(),
            ));
        }
        if config.key_path.as_os_str().is_empty() {
            return Err(ProvisionError::FatalStartup(
                "ssh key path is required".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn connection_options(&self) -> Vec<String> {
        let c = &self.config;
        let mut argv = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", c.connect_timeout_secs),
            "-i".to_string(),
            c.key_path.display().to_string(),
            "-p".to_string(),
            c.port.to_string(),
        ];
        if let Some(known_hosts) = &c.known_hosts {
            argv.push("-o".to_string());
            argv.push("StrictHostKeyChecking=yes".to_string());
            argv.push("-o".to_string());
            argv.push(format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        if let Some(control_path) = &c.control_path {
            argv.push("-o".to_string());
            argv.push("ControlMaster=auto".to_string());
            argv.push("-o".to_string());
            argv.push(format!("ControlPath={}", control_path.display()));
            argv.push("-o".to_string());
            argv.push("ControlPersist=60".to_string());
        }
        argv
    }

    /// Builds the full `ssh` argv for one remote invocation.
    ///
    /// The remote command is sent as one string whose words are each
    /// single-quoted, so the remote shell sees exactly one word per argument.
    pub fn command_line(&self, args: &[String]) -> ProvisionResult<Vec<String>> {
        let mut remote = shell_quote(&self.config.command);
        for arg in args {
            check_argument(arg)?;
            remote.push(' ');
            remote.push_str(&shell_quote(arg));
        }
        let mut argv = self.connection_options();
        argv.push(self.destination());
        argv.push(remote);
        Ok(argv)
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn execute(&self, args: &[String]) -> ProvisionResult<Vec<u8>> {
        let argv = self.command_line(args)?;
        debug!("ssh {} {}", self.destination(), args.join(" "));

        // The child runs in its own task: once dispatched, the command is
        // awaited to completion even if the caller goes away.
        let child = tokio::spawn(async move {
            Command::new("ssh")
                .args(&argv)
                .stdin(Stdio::null())
                .output()
                .await
        });
        let output = child
            .await
            .map_err(|e| ProvisionError::TransientBackend(format!("ssh task failed: {e}")))?
            .map_err(|e| ProvisionError::TransientBackend(format!("failed to run ssh: {e}")))?;

        if !output.status.success() {
            return Err(ProvisionError::TransientBackend(format!(
                "remote command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn close(&self) -> ProvisionResult<()> {
        let Some(control_path) = &self.config.control_path else {
            return Ok(());
        };
        let status = Command::new("ssh")
            .arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => debug!("Closed ssh control socket {}", control_path.display()),
            Ok(s) => debug!("No ssh master to close at {} ({})", control_path.display(), s),
            Err(e) => warn!("Failed to close ssh control socket: {}", e),
        }
        Ok(())
    }
}

/// A scripted channel for tests.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Replays queued responses in order and records every argv it receives.
    #[derive(Debug, Default)]
    pub struct ScriptedChannel {
        responses: Mutex<VecDeque<ProvisionResult<Vec<u8>>>>,
        calls: Mutex<Vec<Vec<String>>>,
        closed: AtomicBool,
    }

    impl ScriptedChannel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a raw stdout body.
        pub fn push_response(&self, body: impl Into<Vec<u8>>) {
            self.responses_lock().push_back(Ok(body.into()));
        }

        /// Queues a command failure.
        pub fn push_failure(&self, message: impl Into<String>) {
            self.responses_lock()
                .push_back(Err(ProvisionError::TransientBackend(message.into())));
        }

        /// Every argv passed to `execute`, oldest first.
        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn responses_lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ProvisionResult<Vec<u8>>>> {
            self.responses.lock().unwrap_or_else(|p| p.into_inner())
        }
    }

    #[async_trait]
    impl RemoteChannel for ScriptedChannel {
        async fn execute(&self, args: &[String]) -> ProvisionResult<Vec<u8>> {
            self.calls
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(args.to_vec());
            self.responses_lock().pop_front().unwrap_or_else(|| {
                Err(ProvisionError::TransientBackend(
                    "no scripted response".to_string(),
                ))
            })
        }

        async fn close(&self) -> ProvisionResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
