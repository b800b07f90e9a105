//! `failed.txt`: tab-separated `<input>\t<error>` lines for operator triage.
//! Write-only from the driver's point of view.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::contract::{FailureEntry, FailureSink, LedgerError};

pub const FAILURE_FILE_NAME: &str = "failed.txt";

pub struct FailureLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(FAILURE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Keeps one entry on one line whatever the error text contains.
fn format_line(entry: &FailureEntry) -> String {
    let error = entry.error.replace(['\r', '\n'], " ");
    format!("{}\t{}\n", entry.input, error)
}

#[async_trait]
impl FailureSink for FailureLog {
    async fn record(&self, entry: &FailureEntry) -> Result<(), LedgerError> {
        let line = format_line(entry);
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiline_errors_stay_on_one_line() {
        let line = format_line(&FailureEntry {
            input: "imgs/a.png".into(),
            error: "HTTP 500:\nupstream\r\nexploded".into(),
        });
        assert_eq!(line, "imgs/a.png\tHTTP 500: upstream  exploded\n");
    }

    #[tokio::test]
    async fn appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log = FailureLog::in_dir(dir.path());
        for input in ["imgs/a.png", "imgs/b.png"] {
            log.record(&FailureEntry {
                input: input.into(),
                error: "boom".into(),
            })
            .await
            .unwrap();
        }
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "imgs/a.png\tboom\nimgs/b.png\tboom\n");
    }
}
