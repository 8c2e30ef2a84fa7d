//! In-memory [`ProvisionBackend`] for tests.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::ProvisionBackend;
use crate::backend::TofuOutput;
use crate::error::Result;
use crate::error::TofuError;

/// Fixture file a work dir may carry to declare its outputs (name -> JSON value).
pub const MOCK_OUTPUTS_FILE: &str = "outputs.json";

/// Records every call as `"<command> <dir>"` and serves canned outputs.
///
/// Outputs registered with [`MockBackend::set_outputs`] win; otherwise a
/// [`MOCK_OUTPUTS_FILE`] in the work dir is served, so templates copied
/// into fresh case directories can bring their own outputs.
#[derive(Debug, Default)]
pub struct MockBackend {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, u32>>,
    outputs: Mutex<HashMap<PathBuf, BTreeMap<String, String>>>,
}

impl MockBackend {
    /// Create a backend where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` invocations of `command` fail.
    pub fn fail_next(&self, command: &'static str, count: u32) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(command, count);
        }
    }

    /// Serve `outputs` (name -> raw JSON) for `dir`.
    pub fn set_outputs(&self, dir: impl Into<PathBuf>, outputs: BTreeMap<String, String>) {
        if let Ok(mut map) = self.outputs.lock() {
            map.insert(dir.into(), outputs);
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, command: &'static str, dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{command} {}", dir.display()));
        }
        if cancel.is_cancelled() {
            return Err(TofuError::Canceled { command });
        }
        let should_fail = match self.failures.lock() {
            Ok(mut failures) => match failures.get_mut(command) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };
        if should_fail {
            return Err(TofuError::CommandFailed {
                command,
                work_dir: dir.to_path_buf(),
                stderr: format!("simulated {command} failure"),
            });
        }
        Ok(TofuOutput {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl ProvisionBackend for MockBackend {
    async fn init(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput> {
        self.record("init", work_dir, cancel)
    }

    async fn apply(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput> {
        self.record("apply", work_dir, cancel)
    }

    async fn destroy(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<TofuOutput> {
        self.record("destroy", work_dir, cancel)
    }

    async fn output(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<BTreeMap<String, String>> {
        self.record("output", work_dir, cancel)?;
        if let Some(outputs) = self.outputs.lock().ok().and_then(|map| map.get(work_dir).cloned()) {
            return Ok(outputs);
        }
        let fixture = match std::fs::read(work_dir.join(MOCK_OUTPUTS_FILE)) {
            Ok(data) => data,
            Err(_) => return Ok(BTreeMap::new()),
        };
        let values: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&fixture).unwrap_or_default();
        Ok(values.into_iter().map(|(k, v)| (k, v.to_string())).collect())
    }

    async fn show(&self, work_dir: &Path, cancel: &CancellationToken) -> Result<String> {
        self.record("show", work_dir, cancel)?;
        Ok(format!("state of {}", work_dir.display()))
    }
}
