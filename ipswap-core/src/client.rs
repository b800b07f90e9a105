//! HTTP implementations of [`Transformer`] and [`ImageFetcher`].
//!
//! [`ChatClient`] speaks the OpenAI-compatible `/chat/completions` protocol: one user
//! message holding the prompt, the subject image and the reference image, both as data
//! URLs. The reply's message content may be a plain string or a list of parts; it is
//! flattened to one string for the extractor.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::ServiceConfig;
use crate::contract::{FetchError, ImageFetcher, ImagePayload, TransformError, Transformer};

pub struct ChatClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    prompt: String,
}

impl ChatClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, TransformError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        info!(
            endpoint = %endpoint,
            model = %config.model,
            timeout_secs = config.request_timeout.as_secs(),
            api_key_set = !config.api_key.is_empty(),
            "Initialised chat completion client"
        );
        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
        })
    }

    fn request_body(&self, subject: &ImagePayload, reference: &ImagePayload) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.prompt },
                    { "type": "image_url", "image_url": { "url": subject.data_url() } },
                    { "type": "image_url", "image_url": { "url": reference.data_url() } },
                ],
            }],
        })
    }
}

#[async_trait]
impl Transformer for ChatClient {
    async fn transform(
        &self,
        subject: &ImagePayload,
        reference: &ImagePayload,
    ) -> Result<String, TransformError> {
        let body = self.request_body(subject, reference);
        debug!(
            subject_bytes = subject.data().len(),
            reference_bytes = reference.data().len(),
            "Sending chat completion request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<failed to decode response body>"));
            error!(status = %status, "Chat completion returned error status");
            return Err(TransformError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = response.json().await?;
        message_content(&json)
    }
}

/// `choices[0].message.content`, flattened to a string.
pub fn message_content(response: &Value) -> Result<String, TransformError> {
    let content = response
        .pointer("/choices/0/message/content")
        .ok_or_else(|| {
            TransformError::MalformedResponse("response has no choices[0].message.content".into())
        })?;

    match content {
        Value::String(s) => Ok(s.clone()),
        Value::Array(parts) => Ok(parts.iter().map(part_text).collect::<Vec<_>>().join("\n")),
        Value::Null => Err(TransformError::MalformedResponse(
            "message content is null".into(),
        )),
        other => Ok(other.to_string()),
    }
}

fn part_text(part: &Value) -> String {
    if let Some(s) = part.as_str() {
        return s.to_string();
    }
    if let Some(text) = part.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    if let Some(url) = part.pointer("/image_url/url").and_then(Value::as_str) {
        return url.to_string();
    }
    part.to_string()
}

/// Downloads result images over plain GET.
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(timeout: std::time::Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let http_error = |source: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self.http.get(url).send().await.map_err(&http_error)?;
        let status = response.status();
        if !status.is_success() {
            error!(url = %url, status = %status, "Result image fetch returned error status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(&http_error)?;
        info!(url = %url, size = bytes.len(), "Fetched result image");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> ChatClient {
        ChatClient::new(&ServiceConfig {
            base_url: "http://localhost:3000/v1/".into(),
            api_key: "k".into(),
            model: "gemini-3-pro-preview".into(),
            prompt: "swap it".into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn endpoint_has_no_double_slash() {
        assert_eq!(client().endpoint, "http://localhost:3000/v1/chat/completions");
    }

    #[test]
    fn request_carries_prompt_then_subject_then_reference() {
        let subject = ImagePayload::new("image/jpeg", b"s".to_vec());
        let reference = ImagePayload::new("image/png", b"r".to_vec());
        let body = client().request_body(&subject, &reference);

        assert_eq!(body["model"], "gemini-3-pro-preview");
        assert_eq!(body["temperature"], 0);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "swap it");
        assert_eq!(content[1]["image_url"]["url"], subject.data_url());
        assert_eq!(content[2]["image_url"]["url"], reference.data_url());
    }

    #[test]
    fn string_content_is_returned_verbatim() {
        let response = json!({ "choices": [{ "message": { "content": "![x](https://a/b.png)" } }] });
        assert_eq!(message_content(&response).unwrap(), "![x](https://a/b.png)");
    }

    #[test]
    fn list_content_is_joined() {
        let response = json!({ "choices": [{ "message": { "content": [
            { "type": "text", "text": "here you go" },
            { "type": "image_url", "image_url": { "url": "data:image/png;base64,aGk=" } },
        ] } }] });
        assert_eq!(
            message_content(&response).unwrap(),
            "here you go\ndata:image/png;base64,aGk="
        );
    }

    #[test]
    fn missing_or_null_content_is_malformed() {
        let empty = json!({ "choices": [] });
        assert!(matches!(
            message_content(&empty),
            Err(TransformError::MalformedResponse(_))
        ));
        let null = json!({ "choices": [{ "message": { "content": null } }] });
        assert!(matches!(
            message_content(&null),
            Err(TransformError::MalformedResponse(_))
        ));
    }
}
