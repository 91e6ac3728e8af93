//! Speech-to-text transcription.
//!
//! The transcription service rejects payloads over its size ceiling, so
//! larger audio is partitioned into fixed-size chunks that are transcribed
//! one at a time and rejoined with blank lines. Chunks run sequentially on
//! purpose: the service meters per-key throughput and a burst of large
//! uploads trips it.

use crate::chunking::split_bytes;
use crate::error::{GranskaError, Result};
use crate::progress::{stage, ProgressSender};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Hard ceiling per transcription request.
pub const MAX_TRANSCRIPTION_BYTES: usize = 24 * 1024 * 1024;

/// Default transcription model.
pub const DEFAULT_MODEL: &str = "whisper-1";

/// Audio bytes plus enough metadata to name and type them for the service.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub data: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl AudioPayload {
    /// Container extension taken from the file name, defaulting to mp3.
    pub fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
            .unwrap_or("mp3")
    }

    pub fn size_mb(&self) -> f64 {
        self.data.len() as f64 / (1024.0 * 1024.0)
    }
}

/// Transcription seam used by the acquisition chain.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a payload of any size, chunking internally as needed.
    async fn transcribe(
        &self,
        audio: &AudioPayload,
        language: Option<&str>,
        progress: &ProgressSender,
    ) -> Result<String>;
}

/// OpenAI Whisper transcriber with a per-run API key.
pub struct WhisperTranscriber {
    client: Client<OpenAIConfig>,
    model: String,
    max_chunk_bytes: usize,
}

impl WhisperTranscriber {
    pub fn new(api_key: &str) -> Self {
        Self::with_config(api_key, DEFAULT_MODEL, MAX_TRANSCRIPTION_BYTES)
    }

    pub fn with_config(api_key: &str, model: &str, max_chunk_bytes: usize) -> Self {
        // 5-minute timeout: large chunks take a while to upload and process
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        let client = Client::with_config(OpenAIConfig::new().with_api_key(api_key))
            .with_http_client(http_client);

        Self {
            client,
            model: model.to_string(),
            max_chunk_bytes,
        }
    }

    async fn transcribe_chunk(
        &self,
        data: Vec<u8>,
        file_name: String,
        language: Option<&str>,
    ) -> Result<String> {
        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(AudioInput::from_vec_u8(file_name, data))
            .model(&self.model)
            .response_format(AudioResponseFormat::Json);

        if let Some(lang) = language {
            request_builder.language(lang);
        }

        let request = request_builder
            .build()
            .map_err(|e| GranskaError::Transcription(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(classify_openai_error)?;

        debug!("Chunk transcribed to {} chars", response.text.chars().count());
        Ok(response.text)
    }
}

#[async_trait]
impl SpeechToText for WhisperTranscriber {
    #[instrument(skip(self, audio, progress), fields(bytes = audio.data.len(), model = %self.model))]
    async fn transcribe(
        &self,
        audio: &AudioPayload,
        language: Option<&str>,
        progress: &ProgressSender,
    ) -> Result<String> {
        let chunks = split_bytes(&audio.data, self.max_chunk_bytes);
        let chunk_count = chunks.len();

        if chunk_count > 1 {
            info!(
                "Audio is {:.1}MB, transcribing as {} chunks",
                audio.size_mb(),
                chunk_count
            );
        }

        let mut transcripts = Vec::with_capacity(chunk_count);
        for (index, chunk) in chunks.into_iter().enumerate() {
            progress.update(
                stage::TRANSCRIBE,
                transcribe_percent(index, chunk_count),
                format!("Transcribing audio chunk {}/{}...", index + 1, chunk_count),
            );
            let text = self
                .transcribe_chunk(
                    chunk.to_vec(),
                    chunk_file_name(index, audio.extension()),
                    language,
                )
                .await?;
            transcripts.push(text);
        }

        Ok(join_transcripts(&transcripts))
    }
}

fn chunk_file_name(index: usize, extension: &str) -> String {
    format!("chunk_{}.{}", index, extension)
}

/// Blank-line join so chunk seams stay visible in the transcript.
pub(crate) fn join_transcripts(parts: &[String]) -> String {
    parts.join("\n\n")
}

/// Percent within the transcription band (40..70) for chunk `index`.
fn transcribe_percent(index: usize, count: usize) -> u8 {
    (40 + index * 30 / count.max(1)) as u8
}

fn classify_openai_error(error: OpenAIError) -> GranskaError {
    match &error {
        OpenAIError::ApiError(api) => {
            if is_rate_limit(api.r#type.as_deref(), &api.message) {
                GranskaError::RateLimited(api.message.clone())
            } else {
                GranskaError::OpenAI(api.message.clone())
            }
        }
        _ => GranskaError::OpenAI(error.to_string()),
    }
}

fn is_rate_limit(kind: Option<&str>, message: &str) -> bool {
    matches!(kind, Some("rate_limit_exceeded") | Some("insufficient_quota"))
        || message.to_lowercase().contains("rate limit")
}
