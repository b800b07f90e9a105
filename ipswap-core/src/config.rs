use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::discover::PlanOptions;
use crate::failure::FAILURE_FILE_NAME;
use crate::ledger::LEDGER_FILE_NAME;
use crate::naming::RenameRule;

/// Settings of one batch run, fully resolved (no defaults left to apply).
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Recorded in every ledger line.
    pub model: String,
    /// Maximum number of items in flight at once, at least 1.
    pub concurrency: usize,
    /// Extra attempts after the first one fails.
    pub retries: u32,
    pub retry_delay: Duration,
    /// 0 means unlimited.
    pub limit: usize,
    pub resume: bool,
    pub rename: Vec<RenameRule>,
}

impl BatchConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join(LEDGER_FILE_NAME)
    }

    pub fn failures_path(&self) -> PathBuf {
        self.output_dir.join(FAILURE_FILE_NAME)
    }

    pub fn plan_options(&self) -> PlanOptions<'_> {
        PlanOptions {
            input_dir: &self.input_dir,
            output_dir: &self.output_dir,
            rename: &self.rename,
            limit: self.limit,
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            input_dir = %self.input_dir.display(),
            output_dir = %self.output_dir.display(),
            model = %self.model,
            concurrency = self.concurrency,
            retries = self.retries,
            resume = self.resume,
            "Loaded batch config"
        );
        debug!(?self, "Batch config loaded (full debug)");
    }
}

/// Where and how to reach the OpenAI-compatible chat completion endpoint.
#[derive(Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("prompt_len", &self.prompt.len())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
