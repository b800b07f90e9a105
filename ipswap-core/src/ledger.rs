//! `manifest.jsonl`: one [`LedgerRecord`] per line, append-only.
//!
//! The same file is the audit log of a run and the checkpoint the next run resumes from.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::contract::{Ledger, LedgerError, LedgerRecord};

pub const LEDGER_FILE_NAME: &str = "manifest.jsonl";

pub struct JsonlLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The ledger that lives alongside the outputs in `output_dir`.
    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(LEDGER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Ledger for JsonlLedger {
    async fn append(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        // open, write, flush, close as one critical section
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(input = %record.input, ok = record.ok, "Appended ledger record");
        Ok(())
    }

    async fn load_completed_inputs(&self) -> Result<HashSet<String>, LedgerError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No ledger yet, nothing to resume");
                return Ok(HashSet::new());
            }
            Err(e) => return Err(e.into()),
        };
        let done = completed_inputs(&content);
        info!(
            path = %self.path.display(),
            completed = done.len(),
            "Loaded resume state from ledger"
        );
        Ok(done)
    }
}

/// Replays ledger lines and returns every input that ever completed.
///
/// Blank and unparseable lines are skipped. A success stays a success even if a later
/// record for the same input failed: its output file is still on disk.
pub fn completed_inputs(content: &str) -> HashSet<String> {
    let mut done = HashSet::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerRecord>(line) {
            Ok(record) if record.ok => {
                done.insert(record.input);
            }
            Ok(_) => {}
            Err(e) => debug!(line = lineno + 1, error = %e, "Skipping unparseable ledger line"),
        }
    }
    done
}
