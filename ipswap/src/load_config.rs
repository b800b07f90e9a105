/// `load_config` module: merges CLI flags, an optional YAML file and built-in defaults into
/// the resolved configs consumed by `ipswap-core`.
///
/// Precedence is always flag > YAML > default. Service credentials never come from YAML;
/// they are read from `OPENAI_BASE_URL` and `OPENAI_API_KEY` (a `.env` file is honoured
/// by `main`).
///
/// # Errors
/// Every startup problem (missing credentials, missing input directory or reference image,
/// unreadable YAML or prompt file) is returned as an `anyhow::Error` and surfaced at the CLI
/// boundary before any work is scheduled.
use anyhow::{bail, Context, Result};
use ipswap_core::batch::MAX_CONCURRENCY;
use ipswap_core::config::{BatchConfig, ServiceConfig};
use ipswap_core::discover::first_input;
use ipswap_core::naming::RenameRule;
use ipswap_core::prompt::DEFAULT_PROMPT;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::{BatchArgs, OneArgs};

pub const DEFAULT_INPUT_DIR: &str = "imgs";
pub const DEFAULT_OUTPUT_DIR: &str = "imgs_monkey";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 3.0;
pub const COMPRESSED_REFERENCE: &str = "monkey-ip-compress.png";
pub const FULL_REFERENCE: &str = "monkey-ip.png";

/// References above this size still work but slow every request down.
pub const LARGE_REFERENCE_BYTES: u64 = 2_000_000;

/// YAML-side batch settings. Every key is optional and uses the flag name in snake_case.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub imgs_dir: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    #[serde(rename = "ref")]
    pub reference: Option<PathBuf>,
    pub model: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay: Option<f64>,
    pub limit: Option<usize>,
    pub resume: Option<bool>,
    pub rename: Option<Vec<RenameRule>>,
    pub prompt_file: Option<PathBuf>,
}

pub fn load_file_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    match serde_yaml::from_str::<Option<FileConfig>>(&content) {
        // an empty file parses to None
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf.unwrap_or_default())
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub base_url: String,
    pub api_key: String,
}

pub fn credentials_from_env() -> Result<Credentials> {
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_default();
    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if base_url.trim().is_empty() || api_key.trim().is_empty() {
        error!(
            base_url_set = !base_url.trim().is_empty(),
            api_key_set = !api_key.trim().is_empty(),
            "Service credentials missing"
        );
        bail!("Missing OPENAI_BASE_URL / OPENAI_API_KEY (set them in the environment or .env)");
    }
    Ok(Credentials { base_url, api_key })
}

/// The compressed reference when present in the working directory, the full one otherwise.
pub fn default_reference() -> PathBuf {
    let compressed = PathBuf::from(COMPRESSED_REFERENCE);
    if compressed.exists() {
        compressed
    } else {
        PathBuf::from(FULL_REFERENCE)
    }
}

pub fn load_prompt(prompt_file: Option<&Path>) -> Result<String> {
    match prompt_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display())),
        None => Ok(DEFAULT_PROMPT.to_string()),
    }
}

pub fn default_rename() -> Vec<RenameRule> {
    vec![RenameRule::new("猪", "猴")]
}

/// Everything a batch run needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch: BatchConfig,
    pub service: ServiceConfig,
    pub reference: PathBuf,
}

pub fn resolve_batch(args: &BatchArgs) -> Result<BatchSettings> {
    let file = match &args.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };
    let credentials = credentials_from_env()?;

    let input_dir = args
        .imgs_dir
        .clone()
        .or(file.imgs_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_DIR));
    if !input_dir.is_dir() {
        bail!("Input directory not found: {}", input_dir.display());
    }

    let reference = args
        .reference
        .clone()
        .or(file.reference)
        .unwrap_or_else(default_reference);
    if !reference.is_file() {
        bail!("Reference image not found: {}", reference.display());
    }

    let output_dir = args
        .out_dir
        .clone()
        .or(file.out_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let model = args
        .model
        .clone()
        .or(file.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let requested = args
        .concurrency
        .or(file.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    let concurrency = if requested == 0 {
        warn!("Concurrency of 0 requested, using 1");
        1
    } else if requested > MAX_CONCURRENCY {
        warn!(
            requested,
            max = MAX_CONCURRENCY,
            "Concurrency above the supported maximum, clamping"
        );
        MAX_CONCURRENCY
    } else {
        requested
    };

    let retry_delay = args
        .retry_delay
        .or(file.retry_delay)
        .unwrap_or(DEFAULT_RETRY_DELAY_SECS);
    let retry_delay = match Duration::try_from_secs_f64(retry_delay) {
        Ok(delay) => delay,
        Err(e) => bail!("Invalid retry delay {retry_delay}: {e}"),
    };

    let rename = if !args.rename.is_empty() {
        args.rename.clone()
    } else {
        file.rename.unwrap_or_else(default_rename)
    };

    let prompt_file = args.prompt_file.clone().or(file.prompt_file);
    let prompt = load_prompt(prompt_file.as_deref())?;
    let timeout = args.timeout.or(file.timeout).unwrap_or(DEFAULT_TIMEOUT_SECS);

    let batch = BatchConfig {
        input_dir,
        output_dir,
        model: model.clone(),
        concurrency,
        retries: args.retries.or(file.retries).unwrap_or(DEFAULT_RETRIES),
        retry_delay,
        limit: args.limit.or(file.limit).unwrap_or(0),
        resume: !args.no_resume && file.resume.unwrap_or(true),
        rename,
    };
    let service = ServiceConfig {
        base_url: credentials.base_url,
        api_key: credentials.api_key,
        model,
        prompt,
        request_timeout: Duration::from_secs(timeout),
    };

    Ok(BatchSettings {
        batch,
        service,
        reference,
    })
}

/// Settings of the single-image `one` run.
#[derive(Debug, Clone)]
pub struct OneSettings {
    pub input: PathBuf,
    pub reference: PathBuf,
    pub output: PathBuf,
    pub service: ServiceConfig,
}

pub fn resolve_one(args: &OneArgs) -> Result<OneSettings> {
    let credentials = credentials_from_env()?;

    let input = match &args.input {
        Some(path) => path.clone(),
        None => match first_input(&args.imgs_dir)? {
            Some(path) => path,
            None => bail!("No non-GIF images found in {}", args.imgs_dir.display()),
        },
    };
    if !input.is_file() {
        bail!("Input image not found: {}", input.display());
    }

    let reference = args.reference.clone().unwrap_or_else(default_reference);
    if !reference.is_file() {
        bail!("Reference image not found: {}", reference.display());
    }

    let service = ServiceConfig {
        base_url: credentials.base_url,
        api_key: credentials.api_key,
        model: args.model.clone(),
        prompt: load_prompt(args.prompt_file.as_deref())?,
        request_timeout: Duration::from_secs(args.timeout),
    };

    Ok(OneSettings {
        input,
        reference,
        output: args.out.clone(),
        service,
    })
}
