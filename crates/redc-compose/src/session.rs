//! Remote sessions on provisioned instances.
//!
//! [`SessionConnector`] opens a [`RemoteSession`] from the connection
//! details a case exposes in its outputs. The production connector drives
//! the system `ssh` and `scp` binaries; tests use
//! [`crate::testing::MockConnector`].

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use redc_core::DynValue;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::ComposeError;
use crate::error::Result;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default remote user.
pub const DEFAULT_SSH_USER: &str = "root";

/// Output keys checked for the remote host, in order.
pub const HOST_OUTPUT_KEYS: [&str; 3] = ["public_ip", "ip", "ssh_host"];

/// Time allowed to establish a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for one remote command or transfer.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Maximum length of one streamed line (64 KB). Longer lines are truncated.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Connection details for one instance.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Password, when no key is available.
    pub password: Option<String>,
    /// Private key file.
    pub private_key: Option<PathBuf>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("private_key", &self.private_key)
            .finish()
    }
}

impl SessionConfig {
    /// Read connection details from a case's decoded outputs.
    pub fn from_outputs(service: &str, outputs: &BTreeMap<String, DynValue>) -> Result<Self> {
        let text = |key: &str| {
            outputs.get(key).map(DynValue::render).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };

        let host = HOST_OUTPUT_KEYS.iter().find_map(|key| text(key)).ok_or_else(|| ComposeError::NoSessionTarget {
            service: service.to_string(),
        })?;
        let port = match text("ssh_port") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ComposeError::Session {
                action: "connect",
                host: host.clone(),
                message: format!("invalid ssh_port output '{raw}'"),
            })?,
            None => DEFAULT_SSH_PORT,
        };

        Ok(Self {
            host,
            port,
            user: text("ssh_user").unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            password: text("ssh_password"),
            private_key: text("ssh_private_key_path").map(PathBuf::from),
        })
    }
}

/// One line of remote command output, newline included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    /// Standard output.
    Stdout(String),
    /// Standard error.
    Stderr(String),
}

impl OutputLine {
    /// Line text regardless of stream.
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }
}

/// An open session on one instance.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Copy a local file or directory to the instance.
    async fn upload(&self, local: &Path, remote: &str, cancel: &CancellationToken) -> Result<()>;

    /// Copy a remote file or directory to the local machine.
    async fn download(&self, remote: &str, local: &Path, cancel: &CancellationToken) -> Result<()>;

    /// Run a shell command, streaming combined output into `sink`.
    ///
    /// A non-zero exit status is an error.
    async fn run_command(&self, command: &str, sink: mpsc::Sender<OutputLine>, cancel: &CancellationToken)
    -> Result<()>;

    /// Release the session.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Connect to the instance described by `config`.
    async fn connect(&self, config: &SessionConfig, cancel: &CancellationToken) -> Result<Box<dyn RemoteSession>>;
}

/// Connector that shells out to `ssh` and `scp`.
///
/// Password-only targets go through `sshpass -e`, with the password passed
/// in the environment rather than on the command line.
#[derive(Debug, Clone)]
pub struct SshCliConnector {
    ssh_binary: String,
    scp_binary: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for SshCliConnector {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            scp_binary: "scp".to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
        }
    }
}

impl SshCliConnector {
    /// Connector using the binaries on `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

#[async_trait]
impl SessionConnector for SshCliConnector {
    async fn connect(&self, config: &SessionConfig, cancel: &CancellationToken) -> Result<Box<dyn RemoteSession>> {
        let session = SshCliSession {
            connector: self.clone(),
            config: config.clone(),
        };
        // Probe once so an unreachable host fails at connect time.
        let mut probe = session.ssh_command();
        probe.arg("true");
        run_process(probe, None, self.connect_timeout, cancel, "connect", &config.host).await?;
        debug!(host = %config.host, port = config.port, user = %config.user, "ssh session established");
        Ok(Box::new(session))
    }
}

struct SshCliSession {
    connector: SshCliConnector,
    config: SessionConfig,
}

impl SshCliSession {
    fn base_command(&self, binary: &str) -> Command {
        let use_sshpass = self.config.password.is_some() && self.config.private_key.is_none();
        let mut cmd = if use_sshpass {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-e").arg(binary);
            if let Some(password) = &self.config.password {
                cmd.env("SSHPASS", password);
            }
            cmd
        } else {
            Command::new(binary)
        };
        cmd.args(["-o", "StrictHostKeyChecking=no", "-o", "UserKnownHostsFile=/dev/null", "-o", "LogLevel=ERROR"]);
        cmd.arg("-o").arg(format!("ConnectTimeout={}", self.connector.connect_timeout.as_secs()));
        if !use_sshpass {
            cmd.args(["-o", "BatchMode=yes"]);
        }
        if let Some(key) = &self.config.private_key {
            cmd.arg("-i").arg(key);
        }
        cmd
    }

    fn ssh_command(&self) -> Command {
        let mut cmd = self.base_command(&self.connector.ssh_binary);
        cmd.arg("-p").arg(self.config.port.to_string());
        cmd.arg(format!("{}@{}", self.config.user, self.config.host));
        cmd
    }

    fn scp_command(&self) -> Command {
        let mut cmd = self.base_command(&self.connector.scp_binary);
        cmd.arg("-r").arg("-P").arg(self.config.port.to_string());
        cmd
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}@{}:{}", self.config.user, self.config.host, path)
    }
}

#[async_trait]
impl RemoteSession for SshCliSession {
    async fn upload(&self, local: &Path, remote: &str, cancel: &CancellationToken) -> Result<()> {
        let mut cmd = self.scp_command();
        cmd.arg(local).arg(self.remote_spec(remote));
        run_process(cmd, None, self.connector.command_timeout, cancel, "upload", &self.config.host).await
    }

    async fn download(&self, remote: &str, local: &Path, cancel: &CancellationToken) -> Result<()> {
        let mut cmd = self.scp_command();
        cmd.arg(self.remote_spec(remote)).arg(local);
        run_process(cmd, None, self.connector.command_timeout, cancel, "download", &self.config.host).await
    }

    async fn run_command(
        &self,
        command: &str,
        sink: mpsc::Sender<OutputLine>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = self.ssh_command();
        cmd.arg("--").arg(command);
        run_process(cmd, Some(sink), self.connector.command_timeout, cancel, "run", &self.config.host).await
    }

    async fn close(&self) -> Result<()> {
        // Every ssh/scp invocation is its own connection.
        Ok(())
    }
}

/// Forward lines from `reader` to `sink`, returning what was read.
async fn pump<R>(reader: R, sink: Option<mpsc::Sender<OutputLine>>, stderr: bool) -> String
where R: AsyncRead + Unpin {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut collected = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.len() > MAX_LINE_LENGTH {
                    let mut cut = MAX_LINE_LENGTH;
                    while !line.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    line.truncate(cut);
                    line.push_str("... [truncated]\n");
                }
                if stderr {
                    collected.push_str(&line);
                }
                if let Some(tx) = &sink {
                    let msg = if stderr {
                        OutputLine::Stderr(line.clone())
                    } else {
                        OutputLine::Stdout(line.clone())
                    };
                    let _ = tx.send(msg).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "error reading command output");
                break;
            }
        }
    }
    collected
}

async fn run_process(
    mut cmd: Command,
    sink: Option<mpsc::Sender<OutputLine>>,
    timeout: Duration,
    cancel: &CancellationToken,
    action: &'static str,
    host: &str,
) -> Result<()> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    let session_err = |message: String| ComposeError::Session {
        action,
        host: host.to_string(),
        message,
    };

    let mut child = cmd.spawn().map_err(|e| session_err(format!("failed to spawn: {e}")))?;
    let stdout = child.stdout.take().ok_or_else(|| session_err("stdout pipe not available".into()))?;
    let stderr = child.stderr.take().ok_or_else(|| session_err("stderr pipe not available".into()))?;

    let stdout_handle = tokio::spawn(pump(stdout, sink.clone(), false));
    let stderr_handle = tokio::spawn(pump(stderr, sink, true));

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| session_err(format!("wait failed: {e}")))?,
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            return Err(session_err(format!("timed out after {}s", timeout.as_secs())));
        }
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(ComposeError::Canceled);
        }
    };

    let _ = stdout_handle.await;
    let stderr_text = stderr_handle.await.unwrap_or_default();

    if !status.success() {
        let code = status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(session_err(format!("exit status {code}: {}", stderr_text.trim())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(pairs: &[(&str, DynValue)]) -> BTreeMap<String, DynValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_config_defaults() {
        let cfg = SessionConfig::from_outputs("web", &outputs(&[("public_ip", "1.2.3.4".into())])).unwrap();
        assert_eq!(cfg.host, "1.2.3.4");
        assert_eq!(cfg.port, DEFAULT_SSH_PORT);
        assert_eq!(cfg.user, DEFAULT_SSH_USER);
        assert!(cfg.password.is_none());
    }

    #[test]
    fn test_config_reads_numeric_port_and_fallback_host_key() {
        let cfg = SessionConfig::from_outputs(
            "web",
            &outputs(&[
                ("ssh_host", "example.net".into()),
                ("ssh_port", DynValue::from(2222i64)),
                ("ssh_user", "ubuntu".into()),
                ("ssh_password", "pw".into()),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.host, "example.net");
        assert_eq!(cfg.port, 2222);
        assert_eq!(cfg.user, "ubuntu");
        assert!(!format!("{cfg:?}").contains("pw\""));
    }

    #[test]
    fn test_config_without_host() {
        let err = SessionConfig::from_outputs("web", &outputs(&[("ip", "".into())])).unwrap_err();
        assert!(matches!(err, ComposeError::NoSessionTarget { .. }));
    }

    #[tokio::test]
    async fn test_run_process_streams_and_reports_status() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut ok = Command::new("sh");
        ok.args(["-c", "echo out; echo err >&2"]);
        run_process(ok, Some(tx), Duration::from_secs(10), &CancellationToken::new(), "run", "local")
            .await
            .unwrap();
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert!(lines.contains(&OutputLine::Stdout("out\n".into())));
        assert!(lines.contains(&OutputLine::Stderr("err\n".into())));

        let mut failing = Command::new("sh");
        failing.args(["-c", "echo boom >&2; exit 3"]);
        let err = run_process(failing, None, Duration::from_secs(10), &CancellationToken::new(), "run", "local")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit status 3: boom"));
    }

    #[tokio::test]
    async fn test_run_process_cancel() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = run_process(cmd, None, Duration::from_secs(60), &cancel, "run", "local").await.unwrap_err();
        assert!(err.is_canceled());
    }
}
