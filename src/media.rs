//! Media references and per-run request types.

use crate::error::{GranskaError, Result};
use regex::Regex;
use std::sync::OnceLock;

fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Matches various YouTube URL formats and bare video IDs
        Regex::new(
            r"(?x)
            (?:
                # Full YouTube URLs
                (?:https?://)?
                (?:www\.|m\.)?
                (?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/|youtube\.com/live/)
                ([a-zA-Z0-9_-]{11})
            )
            |
            # Bare video ID (11 characters)
            ^([a-zA-Z0-9_-]{11})$
        ",
        )
        .expect("Invalid regex")
    })
}

/// A validated reference to a remote video, held as its 11-character ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    id: String,
}

impl MediaRef {
    /// Parse a watch URL, short URL, embed/v/live path, or bare ID.
    pub fn parse(input: &str) -> Option<Self> {
        let caps = video_id_regex().captures(input.trim())?;

        // Try group 1 (URL format) then group 2 (bare ID)
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| Self { id: m.as_str().to_string() })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical watch URL for this video.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

impl std::fmt::Display for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Per-call service credentials. Held only for the duration of one run.
#[derive(Clone)]
pub struct Credentials {
    pub gemini_api_key: String,
    pub openai_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    // Keys never reach logs, even via Debug
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini_api_key", &"[redacted]")
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// What the caller wants analyzed.
#[derive(Debug, Clone)]
pub enum AnalysisInput {
    /// A remote video referenced by ID; content is acquired by the pipeline.
    Remote { media: MediaRef },
    /// An uploaded media file, transcribed directly.
    Upload {
        data: Vec<u8>,
        mime_type: String,
        file_name: String,
    },
}

/// One analysis request: input, instruction prompt, and credentials.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub input: AnalysisInput,
    pub instruction: String,
    pub credentials: Credentials,
    /// Optional language hint for captions and transcription (e.g. "en").
    pub language: Option<String>,
}

impl AnalysisRequest {
    /// Mode-independent validation, before any expensive work.
    pub fn validate(&self) -> Result<()> {
        if self.instruction.trim().is_empty() {
            return Err(GranskaError::InvalidInput(
                "An analysis instruction is required".to_string(),
            ));
        }
        if self.credentials.gemini_api_key.trim().is_empty() {
            return Err(GranskaError::InvalidInput(
                "A Gemini API key is required".to_string(),
            ));
        }
        if let AnalysisInput::Upload { data, .. } = &self.input {
            if data.is_empty() {
                return Err(GranskaError::InvalidInput(
                    "The uploaded file is empty".to_string(),
                ));
            }
            if self
                .credentials
                .openai_api_key
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
            {
                return Err(GranskaError::InvalidInput(
                    "An OpenAI API key is required for uploaded files".to_string(),
                ));
            }
        }
        Ok(())
    }
}
