//! # batch: the bounded-concurrency transformation driver
//!
//! Given a planned set of [`WorkItem`]s and the shared reference payload, the driver fans
//! out under an admission gate and walks each item through
//! `Pending -> InFlight -> {Succeeded, Failed}`:
//!
//! 1. wait for a free slot (at most `concurrency` items hold the gate at once),
//! 2. load and normalise the subject image,
//! 3. call the [`Transformer`], extract the result image and write it to the output path,
//!    retrying any failure up to `retries` more times with a fixed delay in between,
//! 4. append one [`LedgerRecord`] (plus a [`FailureEntry`] on terminal failure) and bump
//!    the shared progress counter.
//!
//! Per-item failures never escape [`BatchDriver::run`]; they end up in the ledger and the
//! failure sink. Only startup problems (see [`BatchDriver::plan`]) are returned as errors.
//!
//! Retries are uniform: every failure of an attempt is retryable, whatever its cause.
//! Completion order across items is whatever the service latency makes it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::asset::AssetLoader;
use crate::config::BatchConfig;
use crate::contract::{
    FailureEntry, FailureSink, FetchError, ImageFetcher, ImagePayload, Ledger, LedgerError,
    LedgerRecord, TransformError, Transformer, WorkItem,
};
use crate::discover::{self, BatchPlan, DiscoverError};
use crate::extract::{extract_image, ExtractError, Extracted};

/// Largest admission gate the driver can build.
pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

/// Total attempts for an item given its retry budget, saturating at `u32::MAX`.
pub fn attempt_budget(retries: u32) -> u32 {
    retries.saturating_add(1)
}

/// Why a single attempt did not produce an output file.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("model response didn't include an image URL or base64 payload")]
    NoImage { content: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one attempt as seen by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Output written. `url` is set when the image was fetched rather than inline.
    Success { url: Option<String> },
    Retryable(String),
    /// Stop without further attempts.
    Terminal(String),
}

impl From<Result<Option<String>, AttemptError>> for AttemptOutcome {
    fn from(result: Result<Option<String>, AttemptError>) -> Self {
        match result {
            Ok(url) => AttemptOutcome::Success { url },
            Err(e) => AttemptOutcome::Retryable(e.to_string()),
        }
    }
}

/// One call to the service, result extraction, optional fetch, and the output write.
pub async fn transform_once(
    transformer: &dyn Transformer,
    fetcher: &dyn ImageFetcher,
    subject: &ImagePayload,
    reference: &ImagePayload,
    output: &Path,
) -> Result<Option<String>, AttemptError> {
    let content = transformer.transform(subject, reference).await?;
    let (bytes, url) = match extract_image(&content)? {
        Extracted::InlineBytes(bytes) => (bytes, None),
        Extracted::RemoteUrl(url) => {
            debug!(url = %url, "Model answered with an image URL, fetching");
            (fetcher.fetch(&url).await?, Some(url))
        }
        Extracted::None => return Err(AttemptError::NoImage { content }),
    };
    tokio::fs::write(output, &bytes)
        .await
        .map_err(|source| AttemptError::Write {
            path: output.to_path_buf(),
            source,
        })?;
    Ok(url)
}

/// `{completed, total}` shared by all in-flight items.
#[derive(Debug)]
pub struct ProgressCounter {
    completed: AtomicUsize,
    total: usize,
}

impl ProgressCounter {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// Marks one more item settled and returns the new completed count.
    pub fn settle(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Every tenth completion and the last one get a progress line.
    pub fn should_report(&self, completed: usize) -> bool {
        completed % 10 == 0 || completed == self.total
    }
}

/// Final state of one item after the driver is done with it.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item: WorkItem,
    pub ok: bool,
    pub attempts: u32,
    pub url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    #[error("reading resume state: {0}")]
    Ledger(#[from] LedgerError),
}

pub struct BatchDriver {
    config: BatchConfig,
    transformer: Arc<dyn Transformer>,
    fetcher: Arc<dyn ImageFetcher>,
    loader: AssetLoader,
    ledger: Arc<dyn Ledger>,
    failures: Arc<dyn FailureSink>,
}

impl BatchDriver {
    pub fn new(
        config: BatchConfig,
        transformer: Arc<dyn Transformer>,
        fetcher: Arc<dyn ImageFetcher>,
        loader: AssetLoader,
        ledger: Arc<dyn Ledger>,
        failures: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            config,
            transformer,
            fetcher,
            loader,
            ledger,
            failures,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Enumerates inputs and subtracts everything the ledger already records as done,
    /// unless resume is disabled.
    pub async fn plan(&self) -> Result<BatchPlan, BatchError> {
        let completed = if self.config.resume {
            self.ledger.load_completed_inputs().await?
        } else {
            info!("Resume disabled, ignoring existing ledger");
            Default::default()
        };
        Ok(discover::plan(&self.config.plan_options(), &completed)?)
    }

    /// Processes every item to a terminal state. Never fails as a whole.
    pub async fn run(&self, reference: &ImagePayload, items: Vec<WorkItem>) -> BatchReport {
        let concurrency = self.config.concurrency.clamp(1, MAX_CONCURRENCY);
        let gate = Semaphore::new(concurrency);
        let progress = ProgressCounter::new(items.len());
        info!(total = items.len(), concurrency, "Starting batch");

        let reports = join_all(
            items
                .into_iter()
                .map(|item| self.process_item(item, reference, &gate, &progress)),
        )
        .await;

        let succeeded = reports.iter().filter(|r| r.ok).count();
        let report = BatchReport {
            total: reports.len(),
            succeeded,
            failed: reports.len() - succeeded,
            items: reports,
        };
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch finished"
        );
        report
    }

    async fn process_item(
        &self,
        item: WorkItem,
        reference: &ImagePayload,
        gate: &Semaphore,
        progress: &ProgressCounter,
    ) -> ItemReport {
        // the gate lives for the whole run and is never closed
        let Ok(_permit) = gate.acquire().await else {
            let outcome = AttemptOutcome::Terminal("admission gate closed".into());
            return self.settle(item, outcome, 0, progress).await;
        };
        debug!(input = %item.input.display(), "Item in flight");

        let subject = match self.load_subject(&item.input).await {
            Ok(subject) => subject,
            Err(reason) => {
                let outcome = AttemptOutcome::Terminal(reason);
                return self.settle(item, outcome, 0, progress).await;
            }
        };

        let max_attempts = attempt_budget(self.config.retries);
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let outcome: AttemptOutcome = transform_once(
                self.transformer.as_ref(),
                self.fetcher.as_ref(),
                &subject,
                reference,
                &item.output,
            )
            .await
            .into();
            match outcome {
                AttemptOutcome::Retryable(reason) if attempts < max_attempts => {
                    warn!(
                        input = %item.input.display(),
                        attempt = attempts,
                        max_attempts,
                        error = %reason,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                settled => break settled,
            }
        };

        self.settle(item, outcome, attempts, progress).await
    }

    async fn load_subject(&self, path: &Path) -> Result<ImagePayload, String> {
        let loader = self.loader.clone();
        let path = path.to_path_buf();
        match tokio::task::spawn_blocking(move || loader.load(&path)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to load input image");
                Err(e.to_string())
            }
            Err(e) => {
                error!(error = %e, "Input loading task failed");
                Err(format!("input loading task failed: {e}"))
            }
        }
    }

    /// Records the terminal state of an item and reports progress.
    async fn settle(
        &self,
        item: WorkItem,
        outcome: AttemptOutcome,
        attempts: u32,
        progress: &ProgressCounter,
    ) -> ItemReport {
        let model = &self.config.model;
        let (record, report) = match outcome {
            AttemptOutcome::Success { url } => {
                info!(
                    input = %item.input.display(),
                    output = %item.output.display(),
                    attempts,
                    "Item succeeded"
                );
                let record = LedgerRecord::succeeded(&item, model, url.clone());
                (
                    record,
                    ItemReport {
                        item,
                        ok: true,
                        attempts,
                        url,
                        error: None,
                    },
                )
            }
            AttemptOutcome::Retryable(reason) | AttemptOutcome::Terminal(reason) => {
                error!(input = %item.input.display(), attempts, error = %reason, "Item failed");
                let entry = FailureEntry {
                    input: item.input_key(),
                    error: reason.clone(),
                };
                if let Err(e) = self.failures.record(&entry).await {
                    error!(input = %entry.input, error = %e, "Failed to write failure log entry");
                }
                let record = LedgerRecord::failed(&item, model, reason.clone());
                (
                    record,
                    ItemReport {
                        item,
                        ok: false,
                        attempts,
                        url: None,
                        error: Some(reason),
                    },
                )
            }
        };

        if let Err(e) = self.ledger.append(&record).await {
            error!(input = %record.input, error = %e, "Failed to append ledger record");
        }

        let completed = progress.settle();
        if progress.should_report(completed) {
            let status = if report.ok { "ok" } else { "fail" };
            println!(
                "[{}/{}] {}: {}",
                completed,
                progress.total(),
                status,
                report.item.display_name()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_reports_every_tenth_and_the_last() {
        let progress = ProgressCounter::new(23);
        let reported: Vec<usize> = (0..23)
            .map(|_| progress.settle())
            .filter(|n| progress.should_report(*n))
            .collect();
        assert_eq!(reported, vec![10, 20, 23]);
        assert_eq!(progress.completed(), 23);
    }

    #[test]
    fn attempt_budget_saturates_instead_of_overflowing() {
        assert_eq!(attempt_budget(0), 1);
        assert_eq!(attempt_budget(2), 3);
        assert_eq!(attempt_budget(u32::MAX), u32::MAX);
    }

    #[test]
    fn attempt_errors_are_all_retryable() {
        let err: Result<Option<String>, AttemptError> = Err(AttemptError::NoImage {
            content: "sorry".into(),
        });
        assert!(matches!(AttemptOutcome::from(err), AttemptOutcome::Retryable(_)));

        let ok: Result<Option<String>, AttemptError> = Ok(Some("https://a/b.png".into()));
        assert_eq!(
            AttemptOutcome::from(ok),
            AttemptOutcome::Success {
                url: Some("https://a/b.png".into())
            }
        );
    }
}
