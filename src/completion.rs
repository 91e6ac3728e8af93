//! Completion service client.
//!
//! All analysis text is produced through [`CompletionBackend`]. The concrete
//! backend talks to the Gemini `generateContent` REST endpoint and can attach
//! media to a prompt either as a remote file pointer or as inline bytes.
//! Rate-limit responses are classified separately so callers can treat them
//! as fatal rather than retriable through another stage.

use crate::error::{GranskaError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default completion model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Media attached to a prompt.
#[derive(Debug, Clone)]
pub enum PromptMedia {
    /// Reference the service resolves itself, e.g. a public watch URL.
    RemoteVideo { uri: String, mime_type: String },
    /// Raw bytes shipped with the request.
    Inline { data: Vec<u8>, mime_type: String },
}

/// Text-completion seam used by the summarizer and the acquisition chain.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Text-only completion. An empty string is a valid response; the
    /// caller decides whether that is benign.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Completion over a prompt plus one media attachment.
    async fn complete_with_media(&self, prompt: &str, media: &PromptMedia) -> Result<String>;
}

/// Gemini REST backend with a per-run API key.
pub struct GeminiCompletion {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiCompletion {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        // Long timeout: a single call may chew through a full transcript
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&body).unwrap_or_default();

        if let Some(error) = parsed.error {
            return Err(classify_api_error(status, &error));
        }
        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(GranskaError::RateLimited(format!("HTTP 429: {}", snippet)));
            }
            return Err(GranskaError::Completion(format!(
                "HTTP {}: {}",
                status, snippet
            )));
        }

        let text = extract_text(parsed);
        debug!("Completion returned {} chars", text.chars().count());
        Ok(text)
    }
}

#[async_trait]
impl CompletionBackend for GeminiCompletion {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_chars = prompt.chars().count()))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(vec![Part::text(prompt)]).await
    }

    #[instrument(skip(self, prompt, media), fields(model = %self.model))]
    async fn complete_with_media(&self, prompt: &str, media: &PromptMedia) -> Result<String> {
        let media_part = match media {
            PromptMedia::RemoteVideo { uri, mime_type } => Part::file(uri, mime_type),
            PromptMedia::Inline { data, mime_type } => Part::inline(data, mime_type),
        };
        self.generate(vec![media_part, Part::text(prompt)]).await
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            file_data: None,
            inline_data: None,
        }
    }

    fn file(uri: &str, mime_type: &str) -> Self {
        Self {
            text: None,
            file_data: Some(FileData {
                file_uri: uri.to_string(),
                mime_type: mime_type.to_string(),
            }),
            inline_data: None,
        }
    }

    fn inline(data: &[u8], mime_type: &str) -> Self {
        Self {
            text: None,
            file_data: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data: BASE64.encode(data),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
    mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

fn classify_api_error(status: StatusCode, error: &ApiError) -> GranskaError {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || error.code == Some(429)
        || error.status.as_deref() == Some("RESOURCE_EXHAUSTED");

    if rate_limited {
        GranskaError::RateLimited(error.message.clone())
    } else {
        GranskaError::Completion(format!(
            "{} ({})",
            error.message,
            error.status.as_deref().unwrap_or("UNKNOWN")
        ))
    }
}

/// First text part of the first candidate, or empty.
fn extract_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .find_map(|p| p.text)
        .unwrap_or_default()
}
