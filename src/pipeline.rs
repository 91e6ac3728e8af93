//! Pipeline orchestration: one run per request.
//!
//! A run validates the request, consults the result cache (remote mode
//! only), drives the acquisition chain, summarizes whatever transcript came
//! back, and writes the result through to the cache without blocking the
//! response. `run` always closes the progress stream with exactly one
//! terminal event, whatever happens inside.

use crate::acquire::{Acquired, AcquisitionChain};
use crate::cache::{fingerprint, AnalysisCache};
use crate::captions::YoutubeCaptions;
use crate::completion::{CompletionBackend, GeminiCompletion};
use crate::config::{Prompts, Settings};
use crate::download::{YoutubeDlDownloader, YtDlpDownloader};
use crate::error::{GranskaError, Result};
use crate::media::{AnalysisInput, AnalysisRequest, MediaRef};
use crate::progress::{stage, ProgressEvent, ProgressSender};
use crate::summarize::Summarizer;
use crate::transcription::{AudioPayload, SpeechToText, WhisperTranscriber, MAX_TRANSCRIPTION_BYTES};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

pub struct Pipeline {
    chain: AcquisitionChain,
    summarizer: Summarizer,
    cache: Option<Arc<dyn AnalysisCache>>,
    deadline: Duration,
}

impl Pipeline {
    /// Build a pipeline for one request, creating per-run service clients
    /// from the request's credentials.
    pub fn for_request(
        request: &AnalysisRequest,
        settings: &Settings,
        cache: Option<Arc<dyn AnalysisCache>>,
    ) -> Result<Self> {
        request.validate()?;

        let completion: Arc<dyn CompletionBackend> = Arc::new(GeminiCompletion::new(
            &request.credentials.gemini_api_key,
            &settings.analysis.model,
        ));

        let transcriber = request.credentials.openai_api_key.as_deref().map(|key| {
            Arc::new(WhisperTranscriber::with_config(
                key,
                &settings.transcription.model,
                MAX_TRANSCRIPTION_BYTES,
            )) as Arc<dyn SpeechToText>
        });

        let chain = AcquisitionChain::new(
            Arc::new(YoutubeCaptions::new()),
            Arc::clone(&completion),
            transcriber,
            Arc::new(YtDlpDownloader),
            Arc::new(YoutubeDlDownloader),
        )
        .with_languages(
            &settings.captions.primary_language,
            &settings.captions.fallback_language,
        )
        .with_audio_first(settings.analysis.audio_first);

        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let summarizer = Summarizer::new(completion)
            .with_prompts(prompts)
            .with_chunk_limit(settings.analysis.chunk_limit)
            .with_batch(
                settings.analysis.batch_size,
                Duration::from_millis(settings.analysis.batch_pause_ms),
            );

        Ok(Self {
            chain,
            summarizer,
            cache,
            deadline: Duration::from_secs(settings.analysis.deadline_seconds),
        })
    }

    /// Build from preassembled components.
    pub fn with_components(
        chain: AcquisitionChain,
        summarizer: Summarizer,
        cache: Option<Arc<dyn AnalysisCache>>,
        deadline: Duration,
    ) -> Self {
        Self { chain, summarizer, cache, deadline }
    }

    /// Drive a full run to its terminal event under the outer deadline.
    /// Exactly one of result or error is emitted, always last.
    #[instrument(skip_all)]
    pub async fn run(&self, request: AnalysisRequest, progress: &ProgressSender) {
        let outcome = timeout(self.deadline, self.execute(request, progress)).await;
        let event = match outcome {
            Ok(Ok(analysis)) => ProgressEvent::result(analysis),
            Ok(Err(e)) => {
                error!("Pipeline run failed: {}", e);
                ProgressEvent::error(e.to_string())
            }
            Err(_) => {
                let e = GranskaError::Timeout(self.deadline.as_secs());
                error!("{}", e);
                ProgressEvent::error(e.to_string())
            }
        };
        progress.emit(event);
    }

    async fn execute(&self, request: AnalysisRequest, progress: &ProgressSender) -> Result<String> {
        request.validate()?;
        // Credentials are dropped here with the request; only the clients
        // built from them live on.
        let AnalysisRequest { input, instruction, language, .. } = request;

        match input {
            AnalysisInput::Remote { media } => {
                self.run_remote(&media, &instruction, language.as_deref(), progress)
                    .await
            }
            AnalysisInput::Upload { data, mime_type, file_name } => {
                let payload = AudioPayload { data, file_name, mime_type };
                let acquired = self
                    .chain
                    .acquire_upload(payload, language.as_deref(), progress)
                    .await?;
                let analysis = self.finish(acquired, &instruction, progress).await?;
                progress.update(stage::FINALIZE, 95, "Wrapping up the result...");
                Ok(analysis)
            }
        }
    }

    async fn run_remote(
        &self,
        media: &MediaRef,
        instruction: &str,
        language: Option<&str>,
        progress: &ProgressSender,
    ) -> Result<String> {
        let key = fingerprint(media.id(), instruction);

        if let Some(cache) = &self.cache {
            // A broken cache is a miss, never a request failure
            match cache.get(&key).await {
                Ok(Some(analysis)) => {
                    info!("Cache hit for {}", key);
                    progress.update(stage::CACHE, 95, "Returning a previously computed analysis...");
                    return Ok(analysis);
                }
                Ok(None) => debug!("Cache miss for {}", key),
                Err(e) => warn!("Cache lookup failed, treating as miss: {}", e),
            }
        }

        let acquired = self
            .chain
            .acquire_remote(media, instruction, language, progress)
            .await?;
        let analysis = self.finish(acquired, instruction, progress).await?;

        if let Some(cache) = &self.cache {
            let cache = Arc::clone(cache);
            let key = key.clone();
            let media_id = media.id().to_string();
            let value = analysis.clone();
            // Fire-and-forget: a failed write is logged and never delays the
            // response
            tokio::spawn(async move {
                if let Err(e) = cache.put(&key, &media_id, &value).await {
                    warn!("Cache write failed for {}: {}", key, e);
                }
            });
        }

        progress.update(stage::FINALIZE, 95, "Wrapping up the result...");
        Ok(analysis)
    }

    /// A direct-stage analysis is already final; every transcript goes
    /// through the summarizer.
    async fn finish(
        &self,
        acquired: Acquired,
        instruction: &str,
        progress: &ProgressSender,
    ) -> Result<String> {
        match acquired {
            Acquired::Analysis(analysis) => Ok(analysis),
            Acquired::Transcript { text, stage: from } => {
                debug!("Summarizing transcript acquired via {}", from);
                self.summarizer.analyze(&text, instruction, progress).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCache;
    use crate::captions::{CaptionFragment, CaptionProvider};
    use crate::completion::PromptMedia;
    use crate::download::{DownloadedAudio, MediaDownloader};
    use crate::media::Credentials;
    use crate::progress::ProgressEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct StubCaptions {
        transcript: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CaptionProvider for StubCaptions {
        async fn fetch(&self, _media: &MediaRef, _language: &str) -> Result<Vec<CaptionFragment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .transcript
                .as_ref()
                .map(|text| vec![CaptionFragment { text: text.clone(), start: 0.0, dur: 1.0 }])
                .unwrap_or_default())
        }
    }

    struct StubCompletion {
        response: String,
        delay: Duration,
    }

    #[async_trait]
    impl CompletionBackend for StubCompletion {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.response.clone())
        }

        async fn complete_with_media(&self, _: &str, _: &PromptMedia) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Err(GranskaError::Completion("no direct analysis".to_string()))
        }
    }

    struct NoDownloader;

    #[async_trait]
    impl MediaDownloader for NoDownloader {
        fn tool(&self) -> &'static str {
            "none"
        }

        async fn download(&self, _media: &MediaRef) -> Result<DownloadedAudio> {
            Err(GranskaError::AudioDownload("unavailable".to_string()))
        }
    }

    fn remote_request(instruction: &str) -> AnalysisRequest {
        AnalysisRequest {
            input: AnalysisInput::Remote { media: MediaRef::parse("dQw4w9WgXcQ").unwrap() },
            instruction: instruction.to_string(),
            credentials: Credentials {
                gemini_api_key: "k".to_string(),
                openai_api_key: None,
            },
            language: None,
        }
    }

    fn pipeline(
        captions: Arc<StubCaptions>,
        completion: Arc<StubCompletion>,
        cache: Option<Arc<dyn AnalysisCache>>,
        deadline: Duration,
    ) -> Pipeline {
        let chain = AcquisitionChain::new(
            captions as Arc<dyn CaptionProvider>,
            Arc::clone(&completion) as Arc<dyn CompletionBackend>,
            None,
            Arc::new(NoDownloader),
            Arc::new(NoDownloader),
        );
        let summarizer = Summarizer::new(completion as Arc<dyn CompletionBackend>);
        Pipeline::with_components(chain, summarizer, cache, deadline)
    }

    fn long_text() -> String {
        "every word counts here. ".repeat(10)
    }

    async fn drain(mut rx: UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn terminal_positions(events: &[ProgressEvent]) -> Vec<usize> {
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_terminal())
            .map(|(i, _)| i)
            .collect()
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_acquisition() {
        let cache = Arc::new(SqliteCache::in_memory().unwrap());
        let key = fingerprint("dQw4w9WgXcQ", "summarize this");
        cache.put(&key, "dQw4w9WgXcQ", "the cached analysis").await.unwrap();

        let captions = Arc::new(StubCaptions { transcript: Some(long_text()), calls: AtomicUsize::new(0) });
        let completion = Arc::new(StubCompletion { response: "fresh".to_string(), delay: Duration::ZERO });
        let pipeline = pipeline(
            Arc::clone(&captions),
            completion,
            Some(cache as Arc<dyn AnalysisCache>),
            Duration::from_secs(10),
        );

        let (progress, rx) = ProgressSender::channel();
        pipeline.run(remote_request("summarize this"), &progress).await;
        drop(progress);

        let events = drain(rx).await;
        match events.last().unwrap() {
            ProgressEvent::Result { analysis } => assert_eq!(analysis, "the cached analysis"),
            other => panic!("expected result, got {:?}", other),
        }
        // No acquisition work happened
        assert_eq!(captions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_result_is_written_through_to_cache() {
        let cache = Arc::new(SqliteCache::in_memory().unwrap());
        let captions = Arc::new(StubCaptions { transcript: Some(long_text()), calls: AtomicUsize::new(0) });
        let completion = Arc::new(StubCompletion { response: "fresh analysis".to_string(), delay: Duration::ZERO });
        let pipeline = pipeline(
            captions,
            completion,
            Some(Arc::clone(&cache) as Arc<dyn AnalysisCache>),
            Duration::from_secs(10),
        );

        let (progress, rx) = ProgressSender::channel();
        pipeline.run(remote_request("summarize this"), &progress).await;
        drop(progress);

        let events = drain(rx).await;
        assert!(matches!(events.last().unwrap(), ProgressEvent::Result { .. }));

        // The write is detached; give it a moment to land
        let key = fingerprint("dQw4w9WgXcQ", "summarize this");
        let mut cached = None;
        for _ in 0..50 {
            cached = cache.get(&key).await.unwrap();
            if cached.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cached.as_deref(), Some("fresh analysis"));
    }

    #[tokio::test]
    async fn test_failed_run_emits_single_error_terminal() {
        let captions = Arc::new(StubCaptions { transcript: None, calls: AtomicUsize::new(0) });
        let completion = Arc::new(StubCompletion { response: String::new(), delay: Duration::ZERO });
        let pipeline = pipeline(captions, completion, None, Duration::from_secs(10));

        let (progress, rx) = ProgressSender::channel();
        pipeline.run(remote_request("summarize this"), &progress).await;
        drop(progress);

        let events = drain(rx).await;
        let terminals = terminal_positions(&events);
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0], events.len() - 1);
        assert!(matches!(events.last().unwrap(), ProgressEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_invalid_request_still_gets_terminal_error() {
        let captions = Arc::new(StubCaptions { transcript: None, calls: AtomicUsize::new(0) });
        let completion = Arc::new(StubCompletion { response: String::new(), delay: Duration::ZERO });
        let pipeline = pipeline(captions, completion, None, Duration::from_secs(10));

        let (progress, rx) = ProgressSender::channel();
        pipeline.run(remote_request("   "), &progress).await;
        drop(progress);

        let events = drain(rx).await;
        match events.last().unwrap() {
            ProgressEvent::Error { message } => {
                assert!(message.contains("instruction"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_turns_into_timeout_error() {
        let captions = Arc::new(StubCaptions { transcript: Some(long_text()), calls: AtomicUsize::new(0) });
        // The analysis call outlives the 2s deadline
        let completion = Arc::new(StubCompletion {
            response: "never seen".to_string(),
            delay: Duration::from_secs(600),
        });
        let pipeline = pipeline(captions, completion, None, Duration::from_secs(2));

        let (progress, rx) = ProgressSender::channel();
        pipeline.run(remote_request("summarize this"), &progress).await;
        drop(progress);

        let events = drain(rx).await;
        match events.last().unwrap() {
            ProgressEvent::Error { message } => {
                assert!(message.contains("timed out"), "got: {}", message);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_mode_never_touches_cache_or_captions() {
        struct FixedTranscriber;

        #[async_trait]
        impl crate::transcription::SpeechToText for FixedTranscriber {
            async fn transcribe(
                &self,
                _audio: &AudioPayload,
                _language: Option<&str>,
                _progress: &ProgressSender,
            ) -> Result<String> {
                Ok("every word counts here. ".repeat(10))
            }
        }

        let captions = Arc::new(StubCaptions { transcript: Some(long_text()), calls: AtomicUsize::new(0) });
        let completion = Arc::new(StubCompletion { response: "upload analysis".to_string(), delay: Duration::ZERO });
        let cache = Arc::new(SqliteCache::in_memory().unwrap());

        let chain = AcquisitionChain::new(
            Arc::clone(&captions) as Arc<dyn CaptionProvider>,
            Arc::clone(&completion) as Arc<dyn CompletionBackend>,
            Some(Arc::new(FixedTranscriber)),
            Arc::new(NoDownloader),
            Arc::new(NoDownloader),
        );
        let summarizer = Summarizer::new(completion as Arc<dyn CompletionBackend>);
        let pipeline = Pipeline::with_components(
            chain,
            summarizer,
            Some(Arc::clone(&cache) as Arc<dyn AnalysisCache>),
            Duration::from_secs(10),
        );

        let request = AnalysisRequest {
            input: AnalysisInput::Upload {
                data: vec![0u8; 64],
                mime_type: "audio/mpeg".to_string(),
                file_name: "lecture.mp3".to_string(),
            },
            instruction: "summarize this".to_string(),
            credentials: Credentials {
                gemini_api_key: "k".to_string(),
                openai_api_key: Some("o".to_string()),
            },
            language: None,
        };

        let (progress, rx) = ProgressSender::channel();
        pipeline.run(request, &progress).await;
        drop(progress);

        let events = drain(rx).await;
        match events.last().unwrap() {
            ProgressEvent::Result { analysis } => assert_eq!(analysis, "upload analysis"),
            other => panic!("expected result, got {:?}", other),
        }
        assert_eq!(captions.calls.load(Ordering::SeqCst), 0);
    }
}
