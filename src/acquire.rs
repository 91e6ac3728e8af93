//! Layered content acquisition.
//!
//! Remote media is tried cheapest-first: published captions, then a single
//! direct-reference completion call where the model reads the video itself,
//! then audio download plus transcription. Each stage either produces
//! content or declines with an explicit reason and the next stage runs.
//! Rate limiting is the exception: it aborts the run, because the stage
//! that hit it cannot be substituted mid-run. Uploaded files skip straight
//! to transcription.

use crate::captions::{join_fragments, CaptionProvider};
use crate::completion::{CompletionBackend, PromptMedia};
use crate::download::{download_with_fallback, MediaDownloader};
use crate::error::{GranskaError, Result};
use crate::media::MediaRef;
use crate::progress::{stage, ProgressSender};
use crate::transcription::{AudioPayload, SpeechToText};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A transcript candidate must exceed this many characters to be usable.
pub const MIN_USABLE_CHARS: usize = 50;

/// Stage that produced (or declined to produce) content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStage {
    Captions,
    DirectReference,
    AudioTranscription,
}

impl std::fmt::Display for AcquisitionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Captions => "captions",
            Self::DirectReference => "direct-analysis",
            Self::AudioTranscription => "transcription",
        };
        write!(f, "{}", label)
    }
}

/// Why a stage declined. These are expected outcomes, not run failures.
#[derive(Debug, Clone, PartialEq)]
pub enum StageFailure {
    NoCaptions,
    CaptionFetchFailed(String),
    TooShort { chars: usize },
    EmptyResponse,
    Rejected(String),
    DownloadFailed(String),
    TranscriptionFailed(String),
    MissingCredentials(&'static str),
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCaptions => write!(f, "no captions in any configured language"),
            Self::CaptionFetchFailed(message) => {
                write!(f, "caption retrieval failed: {}", message)
            }
            Self::TooShort { chars } => {
                write!(f, "transcript too short to analyze ({} chars)", chars)
            }
            Self::EmptyResponse => write!(f, "service returned an empty response"),
            Self::Rejected(message) => write!(f, "service rejected the request: {}", message),
            Self::DownloadFailed(message) => write!(f, "audio download failed: {}", message),
            Self::TranscriptionFailed(message) => write!(f, "transcription failed: {}", message),
            Self::MissingCredentials(which) => write!(f, "no {} API key provided", which),
        }
    }
}

/// What the chain handed back.
#[derive(Debug, Clone)]
pub enum Acquired {
    /// Transcript text, to be summarized downstream.
    Transcript {
        text: String,
        stage: AcquisitionStage,
    },
    /// A finished analysis; the direct stage answers the instruction itself.
    Analysis(String),
}

/// One stage's outcome. A fatal error aborts the whole chain instead.
enum StageOutcome {
    Produced(String),
    Declined(StageFailure),
}

/// The acquisition chain with its service seams injected.
pub struct AcquisitionChain {
    captions: Arc<dyn CaptionProvider>,
    completion: Arc<dyn CompletionBackend>,
    transcriber: Option<Arc<dyn SpeechToText>>,
    primary_downloader: Arc<dyn MediaDownloader>,
    fallback_downloader: Arc<dyn MediaDownloader>,
    primary_language: String,
    fallback_language: String,
    audio_first: bool,
}

impl AcquisitionChain {
    pub fn new(
        captions: Arc<dyn CaptionProvider>,
        completion: Arc<dyn CompletionBackend>,
        transcriber: Option<Arc<dyn SpeechToText>>,
        primary_downloader: Arc<dyn MediaDownloader>,
        fallback_downloader: Arc<dyn MediaDownloader>,
    ) -> Self {
        Self {
            captions,
            completion,
            transcriber,
            primary_downloader,
            fallback_downloader,
            primary_language: "en".to_string(),
            fallback_language: "es".to_string(),
            audio_first: false,
        }
    }

    /// Caption languages: the primary is tried first, the fallback once.
    pub fn with_languages(mut self, primary: &str, fallback: &str) -> Self {
        self.primary_language = primary.to_string();
        self.fallback_language = fallback.to_string();
        self
    }

    /// Skip the direct-reference stage and go straight from captions to
    /// audio transcription.
    pub fn with_audio_first(mut self, audio_first: bool) -> Self {
        self.audio_first = audio_first;
        self
    }

    /// Acquire content for a remote video, cheapest stage first.
    #[instrument(skip_all, fields(media_id = %media.id()))]
    pub async fn acquire_remote(
        &self,
        media: &MediaRef,
        instruction: &str,
        language: Option<&str>,
        progress: &ProgressSender,
    ) -> Result<Acquired> {
        let mut failures: Vec<(AcquisitionStage, StageFailure)> = Vec::new();

        match self.try_captions(media, language, progress).await? {
            StageOutcome::Produced(text) => {
                return Ok(Acquired::Transcript {
                    text,
                    stage: AcquisitionStage::Captions,
                });
            }
            StageOutcome::Declined(failure) => {
                info!("Caption stage declined: {}", failure);
                failures.push((AcquisitionStage::Captions, failure));
            }
        }

        if self.audio_first {
            debug!("Audio-first configured, skipping direct stage");
        } else {
            match self.try_direct(media, instruction, progress).await? {
                StageOutcome::Produced(analysis) => return Ok(Acquired::Analysis(analysis)),
                StageOutcome::Declined(failure) => {
                    info!("Direct stage declined: {}", failure);
                    failures.push((AcquisitionStage::DirectReference, failure));
                }
            }
        }

        match self.try_audio(media, language, progress).await? {
            StageOutcome::Produced(text) => {
                return Ok(Acquired::Transcript {
                    text,
                    stage: AcquisitionStage::AudioTranscription,
                });
            }
            StageOutcome::Declined(failure) => {
                warn!("Audio stage declined: {}", failure);
                failures.push((AcquisitionStage::AudioTranscription, failure));
            }
        }

        Err(aggregate_failures(&failures))
    }

    /// Acquire content for an uploaded file. Only transcription applies;
    /// any failure here ends the run.
    #[instrument(skip_all, fields(file = %payload.file_name))]
    pub async fn acquire_upload(
        &self,
        payload: AudioPayload,
        language: Option<&str>,
        progress: &ProgressSender,
    ) -> Result<Acquired> {
        let Some(transcriber) = &self.transcriber else {
            return Err(GranskaError::Acquisition(
                StageFailure::MissingCredentials("OpenAI").to_string(),
            ));
        };

        progress.update(
            stage::TRANSCRIBE,
            20,
            format!(
                "Preparing \"{}\" ({:.1}MB) for transcription...",
                payload.file_name,
                payload.size_mb()
            ),
        );

        let text = transcriber.transcribe(&payload, language, progress).await?;
        let chars = text.chars().count();
        if chars <= MIN_USABLE_CHARS {
            return Err(GranskaError::Acquisition(
                StageFailure::TooShort { chars }.to_string(),
            ));
        }

        progress.update(
            stage::TRANSCRIBE,
            70,
            format!("Transcription complete ({} chars)", chars),
        );
        Ok(Acquired::Transcript {
            text,
            stage: AcquisitionStage::AudioTranscription,
        })
    }

    async fn try_captions(
        &self,
        media: &MediaRef,
        language_override: Option<&str>,
        progress: &ProgressSender,
    ) -> Result<StageOutcome> {
        let primary = language_override.unwrap_or(&self.primary_language);
        progress.update(
            stage::CAPTIONS,
            10,
            format!("Looking for captions ({})...", primary),
        );

        let mut fragments = match self.captions.fetch(media, primary).await {
            Ok(fragments) => fragments,
            Err(e) => {
                return Ok(StageOutcome::Declined(StageFailure::CaptionFetchFailed(
                    e.to_string(),
                )))
            }
        };

        if fragments.is_empty() && self.fallback_language != primary {
            progress.update(
                stage::CAPTIONS,
                15,
                format!(
                    "No {} captions, trying {}...",
                    primary, self.fallback_language
                ),
            );
            fragments = match self.captions.fetch(media, &self.fallback_language).await {
                Ok(fragments) => fragments,
                Err(e) => {
                    return Ok(StageOutcome::Declined(StageFailure::CaptionFetchFailed(
                        e.to_string(),
                    )))
                }
            };
        }

        if fragments.is_empty() {
            return Ok(StageOutcome::Declined(StageFailure::NoCaptions));
        }

        let text = join_fragments(&fragments);
        let chars = text.chars().count();
        if chars <= MIN_USABLE_CHARS {
            return Ok(StageOutcome::Declined(StageFailure::TooShort { chars }));
        }

        progress.update(
            stage::CAPTIONS,
            30,
            format!("Captions acquired ({} chars)", chars),
        );
        Ok(StageOutcome::Produced(text))
    }

    async fn try_direct(
        &self,
        media: &MediaRef,
        instruction: &str,
        progress: &ProgressSender,
    ) -> Result<StageOutcome> {
        progress.update(
            stage::DIRECT,
            20,
            "No usable captions, asking the model to read the video directly...",
        );

        let attachment = PromptMedia::RemoteVideo {
            uri: media.watch_url(),
            mime_type: "video/mp4".to_string(),
        };

        // Single attempt; this endpoint gets no retry
        match self
            .completion
            .complete_with_media(instruction, &attachment)
            .await
        {
            Ok(analysis) if analysis.trim().is_empty() => {
                Ok(StageOutcome::Declined(StageFailure::EmptyResponse))
            }
            Ok(analysis) => {
                progress.update(stage::DIRECT, 50, "Direct video analysis complete");
                Ok(StageOutcome::Produced(analysis))
            }
            Err(e @ GranskaError::RateLimited(_)) => Err(e),
            Err(e) => Ok(StageOutcome::Declined(StageFailure::Rejected(e.to_string()))),
        }
    }

    async fn try_audio(
        &self,
        media: &MediaRef,
        language: Option<&str>,
        progress: &ProgressSender,
    ) -> Result<StageOutcome> {
        let Some(transcriber) = &self.transcriber else {
            return Ok(StageOutcome::Declined(StageFailure::MissingCredentials(
                "OpenAI",
            )));
        };

        progress.update(stage::DOWNLOAD, 25, "Downloading audio track...");
        let audio = match download_with_fallback(
            self.primary_downloader.as_ref(),
            self.fallback_downloader.as_ref(),
            media,
            progress,
        )
        .await
        {
            Ok(audio) => audio,
            Err(e) => {
                return Ok(StageOutcome::Declined(StageFailure::DownloadFailed(
                    e.to_string(),
                )))
            }
        };

        let label = audio.title.clone().unwrap_or_else(|| media.id().to_string());
        progress.update(
            stage::DOWNLOAD,
            35,
            format!("Downloaded \"{}\" ({:.1}MB)", label, audio.size_mb()),
        );

        let payload = AudioPayload {
            file_name: format!("{}.{}", media.id(), audio.extension),
            mime_type: audio.mime_type,
            data: audio.data,
        };

        let text = match transcriber.transcribe(&payload, language, progress).await {
            Ok(text) => text,
            Err(e @ GranskaError::RateLimited(_)) => return Err(e),
            Err(e) => {
                return Ok(StageOutcome::Declined(StageFailure::TranscriptionFailed(
                    e.to_string(),
                )))
            }
        };

        let chars = text.chars().count();
        if chars <= MIN_USABLE_CHARS {
            return Ok(StageOutcome::Declined(StageFailure::TooShort { chars }));
        }

        progress.update(
            stage::TRANSCRIBE,
            70,
            format!("Transcription complete ({} chars)", chars),
        );
        Ok(StageOutcome::Produced(text))
    }
}

/// One aggregated error carrying the last attempted stage's reason.
fn aggregate_failures(failures: &[(AcquisitionStage, StageFailure)]) -> GranskaError {
    for (stage, failure) in failures {
        warn!("Stage {} declined: {}", stage, failure);
    }
    let message = match failures.last() {
        Some((stage, failure)) => format!(
            "{} stage(s) exhausted; last ({}): {}",
            failures.len(),
            stage,
            failure
        ),
        None => "no acquisition stage was available".to_string(),
    };
    GranskaError::Acquisition(message)
}
