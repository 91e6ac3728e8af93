//! Granska - Long-form Media Analysis
//!
//! Turns long videos and audio files into structured natural-language
//! analyses. Content is acquired through a layered fallback chain (captions,
//! then a direct model call on the video reference, then audio download plus
//! transcription), and summarized with a map-reduce strategy when the
//! transcript is too large for a single model call.
//!
//! The name "Granska" comes from the Swedish word for "examine closely."
//!
//! # Overview
//!
//! Granska allows you to:
//! - Analyze YouTube videos by URL or ID against a free-form instruction
//! - Analyze local or uploaded audio/video files via transcription
//! - Follow progress over SSE or a CLI progress bar while a long run executes
//! - Reuse previous results through a SQLite-backed cache
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration and prompt templates
//! - `media` - Media references, requests, and credentials
//! - `captions` - Caption retrieval from the watch page
//! - `completion` - Gemini completion client
//! - `transcription` - Speech-to-text transcription
//! - `download` - Audio download via external tools
//! - `chunking` - Text and byte chunk splitting
//! - `batch` - Ordered concurrent batch execution
//! - `acquire` - The layered acquisition chain
//! - `summarize` - Single-pass and map-reduce analysis
//! - `cache` - Result cache
//! - `progress` - Progress events and the channel they travel on
//! - `pipeline` - Per-request orchestration
//!
//! # Example
//!
//! ```rust,no_run
//! use granska::config::Settings;
//! use granska::media::{AnalysisInput, AnalysisRequest, Credentials, MediaRef};
//! use granska::pipeline::Pipeline;
//! use granska::progress::ProgressSender;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let request = AnalysisRequest {
//!         input: AnalysisInput::Remote {
//!             media: MediaRef::parse("dQw4w9WgXcQ").unwrap(),
//!         },
//!         instruction: "Summarize the main argument".to_string(),
//!         credentials: Credentials {
//!             gemini_api_key: std::env::var("GEMINI_API_KEY")?,
//!             openai_api_key: None,
//!         },
//!         language: None,
//!     };
//!
//!     let pipeline = Pipeline::for_request(&request, &settings, None)?;
//!     let (progress, mut rx) = ProgressSender::channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = rx.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!     pipeline.run(request, &progress).await;
//!
//!     Ok(())
//! }
//! ```

pub mod acquire;
pub mod batch;
pub mod cache;
pub mod captions;
pub mod chunking;
pub mod cli;
pub mod completion;
pub mod config;
pub mod download;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod summarize;
pub mod transcription;

pub use error::{GranskaError, Result};
