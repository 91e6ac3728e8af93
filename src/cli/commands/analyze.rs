//! Analyze command implementation.

use crate::cache::{AnalysisCache, SqliteCache};
use crate::cli::output::format_duration;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::download::mime_for_extension;
use crate::media::{AnalysisInput, AnalysisRequest, Credentials, MediaRef};
use crate::pipeline::Pipeline;
use crate::progress::{ProgressEvent, ProgressSender};
use anyhow::Result;
use indicatif::ProgressBar;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

/// What the positional input resolved to.
#[derive(Debug)]
enum ResolvedInput {
    Remote(MediaRef),
    LocalFile(String),
}

/// Run the analyze command.
#[allow(clippy::too_many_arguments)]
pub async fn run_analyze(
    input: &str,
    prompt: Option<String>,
    prompt_file: Option<String>,
    language: Option<String>,
    audio_first: bool,
    no_cache: bool,
    output: Option<String>,
    mut settings: Settings,
) -> Result<()> {
    let instruction = read_instruction(prompt, prompt_file)?;
    let resolved = resolve_input(input).ok_or_else(|| {
        anyhow::anyhow!("'{}' is neither a video reference nor an existing file", input)
    })?;

    let operation = match &resolved {
        ResolvedInput::Remote(_) => Operation::AnalyzeRemote,
        ResolvedInput::LocalFile(_) => Operation::AnalyzeUpload,
    };
    if let Err(e) = preflight::check(operation) {
        Output::error(&format!("{}", e));
        Output::info("Run 'granska doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let credentials = Credentials {
        gemini_api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
        openai_api_key: std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty()),
    };

    if audio_first {
        settings.analysis.audio_first = true;
    }

    let request = match resolved {
        ResolvedInput::Remote(media) => {
            Output::info(&format!("Analyzing video {}", media.id()));
            AnalysisRequest {
                input: AnalysisInput::Remote { media },
                instruction,
                credentials,
                language,
            }
        }
        ResolvedInput::LocalFile(path) => {
            let data = tokio::fs::read(&path).await?;
            let file_name = Path::new(&path)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload.bin")
                .to_string();
            let extension = Path::new(&path)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("bin");
            Output::info(&format!(
                "Analyzing file {} ({:.1}MB)",
                file_name,
                data.len() as f64 / (1024.0 * 1024.0)
            ));
            AnalysisRequest {
                input: AnalysisInput::Upload {
                    data,
                    mime_type: mime_for_extension(extension),
                    file_name,
                },
                instruction,
                credentials,
                language,
            }
        }
    };

    let cache = if no_cache { None } else { open_cache(&settings) };
    let pipeline = Pipeline::for_request(&request, &settings, cache)?;

    let started = Instant::now();
    let (progress, rx) = ProgressSender::channel();
    let pb = Output::progress_bar(100, "Starting...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let (_, terminal) = tokio::join!(pipeline.run(request, &progress), render_events(rx, &pb));
    pb.finish_and_clear();

    match terminal {
        Some(ProgressEvent::Result { analysis }) => {
            write_analysis(&analysis, output.as_deref())?;
            Output::success(&format!(
                "Analysis complete in {}",
                format_duration(started.elapsed().as_secs_f64())
            ));
            Ok(())
        }
        Some(ProgressEvent::Error { message }) => {
            Output::error(&message);
            Err(anyhow::anyhow!(message))
        }
        _ => Err(anyhow::anyhow!("The run ended without a result")),
    }
}

/// Consume progress events until the terminal one, driving the bar.
async fn render_events(
    mut rx: UnboundedReceiver<ProgressEvent>,
    pb: &ProgressBar,
) -> Option<ProgressEvent> {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Progress { stage, percent, detail } => {
                pb.set_position(percent as u64);
                pb.set_message(format!("[{}] {}", stage, detail));
            }
            terminal => return Some(terminal),
        }
    }
    None
}

/// A video reference wins over a file path, so a bare ID that happens to
/// match a file name is treated as remote.
fn resolve_input(input: &str) -> Option<ResolvedInput> {
    if let Some(media) = MediaRef::parse(input) {
        return Some(ResolvedInput::Remote(media));
    }
    if Path::new(input).is_file() {
        return Some(ResolvedInput::LocalFile(input.to_string()));
    }
    None
}

fn read_instruction(prompt: Option<String>, prompt_file: Option<String>) -> Result<String> {
    match (prompt, prompt_file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Could not read prompt file '{}': {}", path, e)),
        (None, None) => Err(anyhow::anyhow!(
            "An instruction is required: pass --prompt or --prompt-file"
        )),
    }
}

fn write_analysis(analysis: &str, output: Option<&str>) -> Result<()> {
    match output {
        Some("-") | None => {
            println!();
            println!("{}", analysis);
        }
        Some(path) => {
            std::fs::write(path, analysis)?;
            Output::success(&format!("Analysis saved to {}", path));
        }
    }
    Ok(())
}

fn open_cache(settings: &Settings) -> Option<Arc<dyn AnalysisCache>> {
    if !settings.cache.enabled {
        return None;
    }
    match SqliteCache::open(&settings.cache_path()) {
        Ok(cache) => Some(Arc::new(cache) as Arc<dyn AnalysisCache>),
        Err(e) => {
            warn!("Could not open the result cache, continuing without it: {}", e);
            None
        }
    }
}
