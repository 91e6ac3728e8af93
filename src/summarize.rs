//! Single-pass and map-reduce transcript analysis.
//!
//! Short transcripts get one completion call. Anything over the chunk limit
//! is split on sentence boundaries, digested segment by segment through the
//! batch scheduler, and merged with exactly one reduce call.

use crate::batch::{run_batches, DEFAULT_BATCH_PAUSE};
use crate::chunking::split_text;
use crate::completion::CompletionBackend;
use crate::config::Prompts;
use crate::error::{GranskaError, Result};
use crate::progress::{stage, ProgressSender};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Transcripts at or below this many characters get a single analysis call.
pub const CHUNK_LIMIT: usize = 100_000;

/// Concurrent map calls per batch.
pub const MAP_BATCH_SIZE: usize = 3;

/// Stands in for a single-pass response with no text.
const EMPTY_ANALYSIS: &str = "The analysis came back empty.";

pub struct Summarizer {
    completion: Arc<dyn CompletionBackend>,
    prompts: Prompts,
    chunk_limit: usize,
    batch_size: usize,
    batch_pause: Duration,
}

impl Summarizer {
    pub fn new(completion: Arc<dyn CompletionBackend>) -> Self {
        Self {
            completion,
            prompts: Prompts::default(),
            chunk_limit: CHUNK_LIMIT,
            batch_size: MAP_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_chunk_limit(mut self, chunk_limit: usize) -> Self {
        self.chunk_limit = chunk_limit;
        self
    }

    pub fn with_batch(mut self, batch_size: usize, pause: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_pause = pause;
        self
    }

    /// Analyze a transcript against an instruction, returning the report text.
    #[instrument(skip_all, fields(chars = transcript.chars().count()))]
    pub async fn analyze(
        &self,
        transcript: &str,
        instruction: &str,
        progress: &ProgressSender,
    ) -> Result<String> {
        if transcript.chars().count() <= self.chunk_limit {
            self.analyze_single(transcript, instruction, progress).await
        } else {
            self.analyze_chunked(transcript, instruction, progress)
                .await
        }
    }

    async fn analyze_single(
        &self,
        transcript: &str,
        instruction: &str,
        progress: &ProgressSender,
    ) -> Result<String> {
        progress.update(stage::ANALYZE, 70, "Analyzing the transcript...");

        let vars = HashMap::from([
            ("instruction".to_string(), instruction.to_string()),
            ("transcript".to_string(), transcript.to_string()),
        ]);
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.analysis.single, &vars);

        let analysis = self.completion.complete(&prompt).await?;
        progress.update(stage::ANALYZE, 90, "Analysis complete");

        if analysis.trim().is_empty() {
            return Ok(EMPTY_ANALYSIS.to_string());
        }
        Ok(analysis)
    }

    async fn analyze_chunked(
        &self,
        transcript: &str,
        instruction: &str,
        progress: &ProgressSender,
    ) -> Result<String> {
        let chunks = split_text(transcript, self.chunk_limit);
        let count = chunks.len();
        let total_chars = transcript.chars().count();
        info!(
            "Long transcript ({} chars), analyzing in {} segments",
            total_chars, count
        );
        progress.update(
            stage::ANALYZE,
            70,
            format!(
                "Long transcript detected ({} chars), analyzing in {} segments...",
                total_chars, count
            ),
        );

        let tasks: Vec<_> = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let prompt = self.map_prompt(chunk);
                async move {
                    progress.update(
                        stage::ANALYZE,
                        70,
                        format!("Analyzing segment {}/{}...", index + 1, count),
                    );
                    let digest = self.completion.complete(&prompt).await?;
                    if digest.trim().is_empty() {
                        return Err(GranskaError::Completion(format!(
                            "segment {}/{} produced an empty digest",
                            index + 1,
                            count
                        )));
                    }
                    Ok(digest)
                }
            })
            .collect();

        let digests = run_batches(tasks, self.batch_size, self.batch_pause).await?;

        progress.update(
            stage::ANALYZE,
            85,
            format!("Merging {} segment digests into the final report...", count),
        );

        let combined = digests
            .iter()
            .enumerate()
            .map(|(index, digest)| format!("=== Segment {}/{} ===\n{}", index + 1, count, digest))
            .collect::<Vec<_>>()
            .join("\n\n");

        let vars = HashMap::from([
            ("instruction".to_string(), instruction.to_string()),
            ("count".to_string(), count.to_string()),
            ("digests".to_string(), combined),
        ]);
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.analysis.reduce, &vars);

        let report = self.completion.complete(&prompt).await?;
        if report.trim().is_empty() {
            return Err(GranskaError::Completion(
                "the merge call produced an empty report".to_string(),
            ));
        }

        progress.update(stage::ANALYZE, 90, "Analysis complete");
        Ok(report)
    }

    fn map_prompt(&self, chunk: &str) -> String {
        let vars = HashMap::from([("chunk".to_string(), chunk.to_string())]);
        self.prompts
            .render_with_custom(&self.prompts.analysis.map, &vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::PromptMedia;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const REDUCE_MARK: &str = "[Original request]";

    /// Echoes the tail of each map prompt so ordering is visible in the
    /// reduce input; answers the reduce prompt with a fixed report.
    struct EchoCompletion {
        prompts: Mutex<Vec<String>>,
    }

    impl EchoCompletion {
        fn new() -> Self {
            Self { prompts: Mutex::new(Vec::new()) }
        }

        fn recorded(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for EchoCompletion {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains(REDUCE_MARK) {
                return Ok("final report".to_string());
            }
            let tail: String = prompt.chars().rev().take(6).collect::<Vec<_>>().into_iter().rev().collect();
            Ok(format!("seen<{}>", tail))
        }

        async fn complete_with_media(&self, _: &str, _: &PromptMedia) -> Result<String> {
            Err(GranskaError::Completion("not used".to_string()))
        }
    }

    /// Fixed responses per phase; empty strings simulate blank model output.
    struct ScriptedCompletion {
        single: String,
        map: String,
        reduce: String,
        fail_on: Option<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        fn new(single: &str, map: &str, reduce: &str) -> Self {
            Self {
                single: single.to_string(),
                map: map.to_string(),
                reduce: reduce.to_string(),
                fail_on: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(mut self, needle: &'static str) -> Self {
            self.fail_on = Some(needle);
            self
        }

        fn recorded(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedCompletion {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(needle) = self.fail_on {
                if prompt.contains(needle) {
                    return Err(GranskaError::Completion("scripted failure".to_string()));
                }
            }
            if prompt.contains(REDUCE_MARK) {
                return Ok(self.reduce.clone());
            }
            if prompt.contains("Segment content:") {
                return Ok(self.map.clone());
            }
            Ok(self.single.clone())
        }

        async fn complete_with_media(&self, _: &str, _: &PromptMedia) -> Result<String> {
            Err(GranskaError::Completion("not used".to_string()))
        }
    }

    fn long_transcript() -> &'static str {
        "alpha alpha alpha one. bravo bravo bravo two. charlie charlie three."
    }

    #[tokio::test]
    async fn test_short_transcript_is_one_call() {
        let backend = Arc::new(ScriptedCompletion::new("the report", "", ""));
        let summarizer = Summarizer::new(Arc::clone(&backend) as Arc<dyn CompletionBackend>);
        let (progress, _rx) = ProgressSender::channel();

        let report = summarizer
            .analyze("a short transcript", "summarize this", &progress)
            .await
            .unwrap();

        assert_eq!(report, "the report");
        let prompts = backend.recorded();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0], "summarize this\n\n---\n\na short transcript");
    }

    #[tokio::test]
    async fn test_empty_single_response_becomes_placeholder() {
        let backend = Arc::new(ScriptedCompletion::new("  \n", "", ""));
        let summarizer = Summarizer::new(backend as Arc<dyn CompletionBackend>);
        let (progress, _rx) = ProgressSender::channel();

        let report = summarizer
            .analyze("a short transcript", "summarize this", &progress)
            .await
            .unwrap();

        assert_eq!(report, "The analysis came back empty.");
    }

    #[tokio::test]
    async fn test_long_transcript_map_reduces_in_order() {
        let backend = Arc::new(EchoCompletion::new());
        let summarizer = Summarizer::new(Arc::clone(&backend) as Arc<dyn CompletionBackend>)
            .with_chunk_limit(25)
            .with_batch(2, Duration::from_millis(1));
        let (progress, _rx) = ProgressSender::channel();

        let report = summarizer
            .analyze(long_transcript(), "rank the claims", &progress)
            .await
            .unwrap();

        assert_eq!(report, "final report");

        let prompts = backend.recorded();
        // Three map calls plus one reduce call
        assert_eq!(prompts.len(), 4);
        let reduce = prompts.last().unwrap();
        assert!(reduce.contains("rank the claims"));
        assert!(reduce.contains("=== Segment 1/3 ==="));
        assert!(reduce.contains("=== Segment 3/3 ==="));

        // Digests appear in original chunk order
        let first = reduce.find("seen<a one.>").unwrap();
        let second = reduce.find("seen<o two.>").unwrap();
        let third = reduce.find("seen<three.>").unwrap();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_empty_map_digest_is_an_error() {
        let backend = Arc::new(ScriptedCompletion::new("unused", "", "merged"));
        let summarizer = Summarizer::new(backend as Arc<dyn CompletionBackend>)
            .with_chunk_limit(25)
            .with_batch(2, Duration::from_millis(1));
        let (progress, _rx) = ProgressSender::channel();

        let err = summarizer
            .analyze(long_transcript(), "rank the claims", &progress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("empty digest"));
    }

    #[tokio::test]
    async fn test_empty_reduce_report_is_an_error() {
        let backend = Arc::new(ScriptedCompletion::new("unused", "a digest", "  "));
        let summarizer = Summarizer::new(backend as Arc<dyn CompletionBackend>)
            .with_chunk_limit(25)
            .with_batch(2, Duration::from_millis(1));
        let (progress, _rx) = ProgressSender::channel();

        let err = summarizer
            .analyze(long_transcript(), "rank the claims", &progress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("empty report"));
    }

    #[tokio::test]
    async fn test_map_failure_aborts_before_reduce() {
        let backend = Arc::new(
            ScriptedCompletion::new("unused", "a digest", "merged").failing_on("bravo"),
        );
        let summarizer = Summarizer::new(Arc::clone(&backend) as Arc<dyn CompletionBackend>)
            .with_chunk_limit(25)
            .with_batch(2, Duration::from_millis(1));
        let (progress, _rx) = ProgressSender::channel();

        let err = summarizer
            .analyze(long_transcript(), "rank the claims", &progress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("scripted failure"));
        // The reduce call never went out
        assert!(backend.recorded().iter().all(|p| !p.contains(REDUCE_MARK)));
    }
}
