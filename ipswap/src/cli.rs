//! Command-line surface of ipswap: argument parsing and the async [`run`] entrypoint.
//!
//! All pipeline logic lives in `ipswap-core`; this module resolves configuration, wires the
//! real HTTP client and file-backed logs into the driver, and prints the user-facing
//! banner, progress and summary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ipswap_core::asset::AssetLoader;
use ipswap_core::batch::{transform_once, AttemptError, BatchDriver};
use ipswap_core::client::{ChatClient, HttpFetcher};
use ipswap_core::failure::FailureLog;
use ipswap_core::ledger::JsonlLedger;
use ipswap_core::naming::RenameRule;

use crate::load_config::{resolve_batch, resolve_one, LARGE_REFERENCE_BYTES};

#[derive(Parser)]
#[clap(
    name = "ipswap",
    version,
    about = "Replace the subject of scraped images with a reference character via a generative model"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transform every image in the input directory, resuming from the ledger
    Batch(BatchArgs),
    /// Transform a single image, without ledger or retries
    One(OneArgs),
}

/// Flags left unset fall back to the YAML config file, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// YAML file with the same settings as the flags below
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Input directory [default: imgs]
    #[clap(long)]
    pub imgs_dir: Option<PathBuf>,
    /// Output directory, also holds manifest.jsonl and failed.txt [default: imgs_monkey]
    #[clap(long)]
    pub out_dir: Option<PathBuf>,
    /// Reference image [default: monkey-ip-compress.png if present, else monkey-ip.png]
    #[clap(long = "ref")]
    pub reference: Option<PathBuf>,
    /// Model identifier [default: gemini-3-pro-preview]
    #[clap(long)]
    pub model: Option<String>,
    /// Concurrent generations [default: 3]
    #[clap(long)]
    pub concurrency: Option<usize>,
    /// Per-request timeout in seconds [default: 900]
    #[clap(long)]
    pub timeout: Option<u64>,
    /// Retries per image on failure [default: 2]
    #[clap(long)]
    pub retries: Option<u32>,
    /// Seconds between retries [default: 3.0]
    #[clap(long)]
    pub retry_delay: Option<f64>,
    /// Only process the first N pending images, 0 for all [default: 0]
    #[clap(long)]
    pub limit: Option<usize>,
    /// Do not skip inputs the ledger already records as done
    #[clap(long)]
    pub no_resume: bool,
    /// Substitution applied to input stems when naming outputs, repeatable [default: 猪=猴]
    #[clap(long, value_name = "FROM=TO")]
    pub rename: Vec<RenameRule>,
    /// Replace the built-in instruction prompt with the contents of this file
    #[clap(long)]
    pub prompt_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct OneArgs {
    /// Input image [default: first non-GIF file in --imgs-dir]
    #[clap(long)]
    pub input: Option<PathBuf>,
    /// Directory to pick the input from when --input is not given
    #[clap(long, default_value = "imgs")]
    pub imgs_dir: PathBuf,
    /// Reference image [default: monkey-ip-compress.png if present, else monkey-ip.png]
    #[clap(long = "ref")]
    pub reference: Option<PathBuf>,
    /// Output file
    #[clap(long, default_value = "out_test_monkey.png")]
    pub out: PathBuf,
    #[clap(long, default_value = "gemini-3-pro-preview")]
    pub model: String,
    /// Request timeout in seconds
    #[clap(long, default_value_t = 600)]
    pub timeout: u64,
    #[clap(long)]
    pub prompt_file: Option<PathBuf>,
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("run_started");

    match cli.command {
        Commands::Batch(args) => run_batch(args).await,
        Commands::One(args) => run_one(args).await,
    }
}

async fn run_batch(args: BatchArgs) -> Result<()> {
    let resolved = resolve_batch(&args)?;
    resolved.batch.trace_loaded();
    let batch = resolved.batch;

    std::fs::create_dir_all(&batch.output_dir).with_context(|| {
        format!("Failed to create output directory {}", batch.output_dir.display())
    })?;

    let size = std::fs::metadata(&resolved.reference).map(|m| m.len()).unwrap_or(0);
    if size > LARGE_REFERENCE_BYTES {
        tracing::warn!(path = %resolved.reference.display(), size, "Reference image is large");
        println!("Warning: reference image is large ({size} bytes); consider using a smaller ref.");
    }

    let loader = AssetLoader::with_system_converter();
    let reference = loader.load(&resolved.reference).with_context(|| {
        format!("Failed to load reference image {}", resolved.reference.display())
    })?;

    let transformer = ChatClient::new(&resolved.service).context("Failed to build HTTP client")?;
    let fetcher = HttpFetcher::new(resolved.service.request_timeout)
        .context("Failed to build HTTP client")?;
    let ledger = JsonlLedger::new(batch.ledger_path());
    let failures = FailureLog::new(batch.failures_path());
    let ledger_path = ledger.path().to_path_buf();
    let failures_path = failures.path().to_path_buf();

    let driver = BatchDriver::new(
        batch,
        Arc::new(transformer),
        Arc::new(fetcher),
        loader,
        Arc::new(ledger),
        Arc::new(failures),
    );
    let plan = driver.plan().await.context("Failed to plan batch")?;

    println!("Model={}", driver.config().model);
    println!("Input images (new): {}", plan.items.len());
    println!("Output dir: {}", driver.config().output_dir.display());

    let report = driver.run(&reference, plan.items).await;
    tracing::info!(
        command = "batch",
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        "Batch complete"
    );

    println!("Done.");
    println!("Manifest: {}", ledger_path.display());
    if failures_path.exists() {
        println!("Failures: {}", failures_path.display());
    }
    Ok(())
}

async fn run_one(args: OneArgs) -> Result<()> {
    let resolved = resolve_one(&args)?;

    let loader = AssetLoader::with_system_converter();
    let subject = loader.load(&resolved.input).with_context(|| {
        format!("Failed to load input image {}", resolved.input.display())
    })?;
    let reference = loader.load(&resolved.reference).with_context(|| {
        format!("Failed to load reference image {}", resolved.reference.display())
    })?;

    println!("Using model={}", resolved.service.model);
    println!("Input: {} ({} bytes)", resolved.input.display(), subject.data().len());
    println!("Ref:   {} ({} bytes)", resolved.reference.display(), reference.data().len());
    println!("Sending request...");

    let transformer = ChatClient::new(&resolved.service).context("Failed to build HTTP client")?;
    let fetcher = HttpFetcher::new(resolved.service.request_timeout)
        .context("Failed to build HTTP client")?;

    match transform_once(&transformer, &fetcher, &subject, &reference, &resolved.output).await {
        Ok(url) => {
            tracing::info!(command = "one", url = ?url, "Single transformation complete");
            println!("OK: {} -> {}", resolved.input.display(), resolved.output.display());
            Ok(())
        }
        Err(AttemptError::NoImage { content }) => {
            tracing::error!(command = "one", "Model response had no image");
            anyhow::bail!(
                "Model response didn't include an image URL/base64. Raw content:\n{content}"
            )
        }
        Err(e) => {
            tracing::error!(command = "one", error = %e, "Single transformation failed");
            Err(anyhow::Error::new(e).context("Transformation failed"))
        }
    }
}
