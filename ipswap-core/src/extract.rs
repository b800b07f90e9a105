//! Locates the result image in a free-form model response.
//!
//! The upstream response format is not contractually fixed, so this scans text instead of
//! requiring a schema. First match wins, in this order:
//! 1. an inline `data:image/...;base64,...` payload (no extra network trip),
//! 2. a Markdown image link `![...](http(s)://...)`,
//! 3. any bare `http(s)://` token, with trailing punctuation trimmed.

use std::sync::LazyLock;

use base64::{engine::general_purpose, Engine};
use regex::Regex;

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/[a-zA-Z0-9.+-]+;base64,([A-Za-z0-9+/=]+)").expect("valid regex")
});
static MARKDOWN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\((https?://[^\s)]+)\)").expect("valid regex")
});
static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

/// Characters a greedy URL match commonly drags along from surrounding prose.
const URL_TRAILING: &[char] = &[')', '.', ',', ']', '"', '\''];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    InlineBytes(Vec<u8>),
    RemoteUrl(String),
    None,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("inline image payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

pub fn extract_image(text: &str) -> Result<Extracted, ExtractError> {
    if let Some(caps) = DATA_URL.captures(text) {
        let encoded = &caps[1];
        let bytes = general_purpose::STANDARD.decode(encoded)?;
        return Ok(Extracted::InlineBytes(bytes));
    }

    if let Some(caps) = MARKDOWN_IMAGE.captures(text) {
        return Ok(Extracted::RemoteUrl(caps[1].to_string()));
    }

    if let Some(m) = BARE_URL.find(text) {
        let url = m.as_str().trim_end_matches(URL_TRAILING);
        return Ok(Extracted::RemoteUrl(url.to_string()));
    }

    Ok(Extracted::None)
}
