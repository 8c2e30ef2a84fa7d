//! In-memory [`SessionConnector`] for tests.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ComposeError;
use crate::error::Result;
use crate::session::OutputLine;
use crate::session::RemoteSession;
use crate::session::SessionConfig;
use crate::session::SessionConnector;

#[derive(Debug, Default)]
struct MockState {
    events: Vec<String>,
    unreachable: HashSet<String>,
    failing_commands: HashSet<String>,
    failing_uploads: HashSet<String>,
    responses: HashMap<String, String>,
}

/// Records every session operation as a string event.
///
/// Events look like `connect 1.2.3.4`, `upload 1.2.3.4 ./a -> /b`,
/// `run 1.2.3.4 echo hi`, `download 1.2.3.4 /b -> ./a`, `close 1.2.3.4`.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// A connector where every host is reachable and every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connections to `host` fail.
    pub fn set_unreachable(&self, host: &str) {
        self.with_state(|s| {
            s.unreachable.insert(host.to_string());
        });
    }

    /// Make the exact `command` exit non-zero.
    pub fn fail_command(&self, command: &str) {
        self.with_state(|s| {
            s.failing_commands.insert(command.to_string());
        });
    }

    /// Make uploads of `local` fail.
    pub fn fail_upload(&self, local: &str) {
        self.with_state(|s| {
            s.failing_uploads.insert(local.to_string());
        });
    }

    /// Output streamed when the exact `command` runs.
    pub fn respond(&self, command: &str, output: &str) {
        self.with_state(|s| {
            s.responses.insert(command.to_string(), output.to_string());
        });
    }

    /// Events recorded so far.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().map(|s| s.events.clone()).unwrap_or_default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> Option<T> {
        self.state.lock().ok().map(|mut s| f(&mut s))
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self, config: &SessionConfig, cancel: &CancellationToken) -> Result<Box<dyn RemoteSession>> {
        if cancel.is_cancelled() {
            return Err(ComposeError::Canceled);
        }
        let reachable = self
            .with_state(|s| {
                s.events.push(format!("connect {}", config.host));
                !s.unreachable.contains(&config.host)
            })
            .unwrap_or(false);
        if !reachable {
            return Err(ComposeError::Session {
                action: "connect",
                host: config.host.clone(),
                message: "host unreachable".into(),
            });
        }
        Ok(Box::new(MockSession {
            host: config.host.clone(),
            connector: self.clone(),
        }))
    }
}

struct MockSession {
    host: String,
    connector: MockConnector,
}

impl MockSession {
    fn fail(&self, action: &'static str, message: &str) -> ComposeError {
        ComposeError::Session {
            action,
            host: self.host.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn upload(&self, local: &Path, remote: &str, _cancel: &CancellationToken) -> Result<()> {
        let local = local.display().to_string();
        let failing = self
            .connector
            .with_state(|s| {
                s.events.push(format!("upload {} {local} -> {remote}", self.host));
                s.failing_uploads.iter().any(|f| local.ends_with(f.as_str()))
            })
            .unwrap_or(false);
        if failing {
            return Err(self.fail("upload", "simulated upload failure"));
        }
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path, _cancel: &CancellationToken) -> Result<()> {
        self.connector.with_state(|s| s.events.push(format!("download {} {remote} -> {}", self.host, local.display())));
        Ok(())
    }

    async fn run_command(
        &self,
        command: &str,
        sink: mpsc::Sender<OutputLine>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ComposeError::Canceled);
        }
        let (response, failing) = self
            .connector
            .with_state(|s| {
                s.events.push(format!("run {} {command}", self.host));
                (s.responses.get(command).cloned(), s.failing_commands.contains(command))
            })
            .unwrap_or((None, false));
        if let Some(output) = response {
            for line in output.split_inclusive('\n') {
                let _ = sink.send(OutputLine::Stdout(line.to_string())).await;
            }
        }
        if failing {
            let _ = sink.send(OutputLine::Stderr("simulated failure\n".into())).await;
            return Err(self.fail("run", "exit status 1: simulated failure"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connector.with_state(|s| s.events.push(format!("close {}", self.host)));
        Ok(())
    }
}
