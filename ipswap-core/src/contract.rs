//! # contract: shared data model and the ports the driver talks through
//!
//! The batch driver never touches the network, the filesystem logs or an external
//! conversion tool directly. It goes through the traits below, so every seam can be
//! replaced by a `mockall` mock or a hand-written fake in tests.
//!
//! ## Ports
//! - [`Transformer`]: one chat-style call carrying the prompt and two images.
//! - [`ImageFetcher`]: downloads a result image when the model answers with a URL.
//! - [`Ledger`]: append-only outcome log, also the resume checkpoint.
//! - [`FailureSink`]: operator-facing log of terminal failures.
//! - [`ImageConverter`]: turns an image the service may reject into PNG bytes.
//!
//! ## Types
//! [`WorkItem`], [`LedgerRecord`], [`FailureEntry`] and [`ImagePayload`] are plain data.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use mockall::automock;
use serde::{Deserialize, Serialize};

/// One input image slated for transformation and the path its result is written to.
///
/// Discovered once per run by directory enumeration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl WorkItem {
    /// The identity key used in ledger records and for resume.
    pub fn input_key(&self) -> String {
        self.input.display().to_string()
    }

    pub fn output_key(&self) -> String {
        self.output.display().to_string()
    }

    /// File name of the input, for progress lines.
    pub fn display_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_key())
    }
}

/// Durable outcome of one work item, serialised as one JSON object per ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub input: String,
    pub output: String,
    pub ok: bool,
    pub model: String,
    /// Set when the result was fetched from a remote URL instead of inline bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Set when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LedgerRecord {
    pub fn succeeded(item: &WorkItem, model: &str, url: Option<String>) -> Self {
        Self {
            input: item.input_key(),
            output: item.output_key(),
            ok: true,
            model: model.to_string(),
            url,
            error: None,
        }
    }

    pub fn failed(item: &WorkItem, model: &str, error: String) -> Self {
        Self {
            input: item.input_key(),
            output: item.output_key(),
            ok: false,
            model: model.to_string(),
            url: None,
            error: Some(error),
        }
    }
}

/// Human-readable `(input, error)` pair written when an item exhausts its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub input: String,
    pub error: String,
}

/// A transport-ready image: MIME type plus raw bytes.
///
/// The base64 data URL is built on first use and kept, so a payload shared across
/// requests (the reference image) is encoded once per run.
#[derive(Clone)]
pub struct ImagePayload {
    mime: String,
    data: Vec<u8>,
    data_url: OnceLock<String>,
}

impl ImagePayload {
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
            data_url: OnceLock::new(),
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// `data:<mime>;base64,<bytes>`, the form the chat API accepts for `image_url`.
    pub fn data_url(&self) -> &str {
        self.data_url.get_or_init(|| {
            format!(
                "data:{};base64,{}",
                self.mime,
                general_purpose::STANDARD.encode(&self.data)
            )
        })
    }
}

impl PartialEq for ImagePayload {
    fn eq(&self, other: &Self) -> bool {
        self.mime == other.mime && self.data == other.data
    }
}

impl Eq for ImagePayload {}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime", &self.mime)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetching {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialisation error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("converting {path} with {program} failed: {detail}")]
    Conversion {
        path: PathBuf,
        program: String,
        detail: String,
    },
}

/// The external generative call: one text prompt plus subject and reference images.
///
/// Returns the response message content normalised to a single string; the driver
/// hands it to [`crate::extract::extract_image`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        subject: &ImagePayload,
        reference: &ImagePayload,
    ) -> Result<String, TransformError>;
}

/// Downloads a result image referenced by URL in the model response.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Append-only outcome log.
///
/// `append` must be indivisible with respect to concurrent appenders: readers parse the
/// backing store line by line and cannot tolerate interleaved partial lines.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn append(&self, record: &LedgerRecord) -> Result<(), LedgerError>;

    /// Inputs with at least one `ok == true` record. Unparseable lines are skipped.
    async fn load_completed_inputs(&self) -> Result<HashSet<String>, LedgerError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn record(&self, entry: &FailureEntry) -> Result<(), LedgerError>;
}

/// Converts an image file to PNG bytes.
///
/// `Ok(None)` means no conversion capability is available on this host, which callers
/// treat as a signal to degrade rather than fail.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ImageConverter: Send + Sync {
    fn to_png(&self, source: &Path) -> Result<Option<Vec<u8>>, AssetError>;
}
