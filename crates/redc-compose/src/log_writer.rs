//! Streaming command output to per-service log files.
//!
//! ```text
//! remote command
//!      |
//!      v
//! mpsc::Sender<OutputLine>  (bounded)
//!      |
//!      v
//! spawned writer task ---> <project>/logs/<service>.log (append)
//!      |               \-> stdout (optional mirror)
//!      v
//! collected output returned from the JoinHandle
//! ```
//!
//! # Tiger Style
//!
//! - Bounded channel capacity for backpressure
//! - Bounded in-memory capture; the log file always gets everything

use std::path::Path;
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::LogWriterSnafu;
use crate::error::Result;
use crate::session::OutputLine;

/// Channel buffer capacity for output lines.
pub const LOG_CHANNEL_CAPACITY: usize = 1000;

/// Maximum bytes of output kept in memory per writer (1 MB).
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Log directory under a project directory.
pub const LOGS_DIR: &str = "logs";

/// Log name used for setup task output.
pub const SETUP_LOG: &str = "setup";

/// Path of the log file for `name` under `project_dir`.
pub fn log_path(project_dir: &Path, name: &str) -> PathBuf {
    project_dir.join(LOGS_DIR).join(format!("{name}.log"))
}

/// Spawn a writer appending every received line to `path`.
///
/// The returned handle yields the captured output once every sender is
/// dropped. A log file that cannot be opened is reported and skipped; the
/// capture and the stdout mirror keep working.
pub fn spawn_log_writer(path: PathBuf, mirror_stdout: bool) -> (mpsc::Sender<OutputLine>, JoinHandle<String>) {
    let (tx, mut rx) = mpsc::channel::<OutputLine>(LOG_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut file = match open_append(&path).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open log file; output not persisted");
                None
            }
        };
        let mut stdout = tokio::io::stdout();
        let mut captured = String::new();

        while let Some(line) = rx.recv().await {
            let text = line.text();
            if let Some(f) = file.as_mut() {
                if let Err(e) = f.write_all(text.as_bytes()).await {
                    warn!(path = %path.display(), error = %e, "log write failed; closing log file");
                    file = None;
                }
            }
            if mirror_stdout {
                let _ = stdout.write_all(text.as_bytes()).await;
            }
            if captured.len().saturating_add(text.len()) <= MAX_CAPTURE_BYTES {
                captured.push_str(text);
            }
        }

        if let Some(mut f) = file {
            let _ = f.flush().await;
        }
        if mirror_stdout {
            let _ = stdout.flush().await;
        }
        captured
    });

    (tx, handle)
}

/// Wait for a writer from [`spawn_log_writer`] and return its capture.
pub async fn join_log_writer(handle: JoinHandle<String>) -> Result<String> {
    handle.await.context(LogWriterSnafu)
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writer_appends_and_captures() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), "web");

        let (tx, handle) = spawn_log_writer(path.clone(), false);
        tx.send(OutputLine::Stdout("hello\n".into())).await.unwrap();
        tx.send(OutputLine::Stderr("oops\n".into())).await.unwrap();
        drop(tx);
        assert_eq!(handle.await.unwrap(), "hello\noops\n");

        let (tx, handle) = spawn_log_writer(path.clone(), false);
        tx.send(OutputLine::Stdout("again\n".into())).await.unwrap();
        drop(tx);
        assert_eq!(handle.await.unwrap(), "again\n");

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\noops\nagain\n");
    }

    #[tokio::test]
    async fn test_join_reports_stopped_writer() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, handle) = spawn_log_writer(log_path(dir.path(), "web"), false);
        handle.abort();

        let err = join_log_writer(handle).await.unwrap_err();
        assert!(matches!(err, crate::error::ComposeError::LogWriter { .. }), "{err:?}");
        drop(tx);
    }

    #[tokio::test]
    async fn test_unwritable_log_still_captures() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the logs directory should be.
        std::fs::write(dir.path().join(LOGS_DIR), "not a dir").unwrap();
        let (tx, handle) = spawn_log_writer(log_path(dir.path(), "web"), false);
        tx.send(OutputLine::Stdout("kept\n".into())).await.unwrap();
        drop(tx);
        assert_eq!(handle.await.unwrap(), "kept\n");
    }
}
