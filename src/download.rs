//! Remote audio download.
//!
//! Audio is pulled with an external downloader into a temp dir and read back
//! as bytes. Two tools are supported: yt-dlp by default and youtube-dl as a
//! fallback for environments where only the older tool is installed. The
//! fallback is transparent; the primary tool's error is logged and swallowed,
//! so only the fallback's error can reach the caller.

use crate::error::{GranskaError, Result};
use crate::media::MediaRef;
use crate::progress::{stage, ProgressSender};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Audio pulled from a remote video.
#[derive(Debug, Clone)]
pub struct DownloadedAudio {
    pub data: Vec<u8>,
    pub extension: String,
    pub mime_type: String,
    pub title: Option<String>,
}

impl DownloadedAudio {
    pub fn size_mb(&self) -> f64 {
        self.data.len() as f64 / (1024.0 * 1024.0)
    }
}

/// One concrete download tool.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Binary name, used in progress and error messages.
    fn tool(&self) -> &'static str;

    async fn download(&self, media: &MediaRef) -> Result<DownloadedAudio>;
}

pub struct YtDlpDownloader;

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    fn tool(&self) -> &'static str {
        "yt-dlp"
    }

    async fn download(&self, media: &MediaRef) -> Result<DownloadedAudio> {
        run_download("yt-dlp", media).await
    }
}

pub struct YoutubeDlDownloader;

#[async_trait]
impl MediaDownloader for YoutubeDlDownloader {
    fn tool(&self) -> &'static str {
        "youtube-dl"
    }

    async fn download(&self, media: &MediaRef) -> Result<DownloadedAudio> {
        run_download("youtube-dl", media).await
    }
}

/// Try `primary`, then `fallback`. The primary's error never surfaces.
pub async fn download_with_fallback(
    primary: &dyn MediaDownloader,
    fallback: &dyn MediaDownloader,
    media: &MediaRef,
    progress: &ProgressSender,
) -> Result<DownloadedAudio> {
    match primary.download(media).await {
        Ok(audio) => Ok(audio),
        Err(primary_error) => {
            debug!(
                "{} failed ({}), retrying with {}",
                primary.tool(),
                primary_error,
                fallback.tool()
            );
            progress.update(
                stage::DOWNLOAD,
                30,
                format!(
                    "{} unavailable, retrying with {}...",
                    primary.tool(),
                    fallback.tool()
                ),
            );
            fallback.download(media).await
        }
    }
}

#[instrument(skip(media), fields(media_id = %media.id()))]
async fn run_download(binary: &'static str, media: &MediaRef) -> Result<DownloadedAudio> {
    let temp_dir = tempfile::tempdir()?;
    let template = temp_dir.path().join(format!("{}.%(ext)s", media.id()));

    info!("Downloading audio with {}", binary);

    // --print-json is understood by both tools and emits metadata while
    // still downloading
    let result = Command::new(binary)
        .arg("--print-json")
        .arg("--extract-audio")
        .arg("--audio-format").arg("mp3")
        .arg("--audio-quality").arg("5")
        .arg("--output").arg(template.to_str().unwrap_or_default())
        .arg("--no-playlist")
        .arg("--no-warnings")
        .arg(media.watch_url())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GranskaError::ToolNotFound(binary.into()));
        }
        Err(e) => {
            return Err(GranskaError::AudioDownload(format!(
                "{binary} execution failed: {e}"
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GranskaError::AudioDownload(format!(
            "{binary} failed: {stderr}"
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let title = extract_title(&stdout);

    let path = find_audio_file(temp_dir.path(), media.id())?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3")
        .to_string();

    let data = tokio::fs::read(&path).await?;
    if data.is_empty() {
        return Err(GranskaError::AudioDownload(
            "Downloaded audio file is empty".into(),
        ));
    }

    debug!("Downloaded {} bytes ({})", data.len(), extension);
    Ok(DownloadedAudio {
        data,
        mime_type: mime_for_extension(&extension),
        extension,
        title,
    })
}

/// Title from the tool's metadata JSON (one object per line on stdout).
fn extract_title(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|v| v["title"].as_str().map(|s| s.to_string()))
    })
}

/// Locate the produced audio file by media ID.
fn find_audio_file(dir: &Path, media_id: &str) -> Result<PathBuf> {
    // Requested mp3, but extraction can leave other containers behind
    for ext in &["mp3", "opus", "m4a", "webm", "ogg"] {
        let candidate = dir.join(format!("{}.{}", media_id, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| GranskaError::AudioDownload(format!("Cannot read directory: {e}")))?;

    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(media_id) {
            return Ok(entry.path());
        }
    }

    Err(GranskaError::AudioDownload(
        "Audio file not found after download".into(),
    ))
}

pub(crate) fn mime_for_extension(extension: &str) -> String {
    match extension {
        "mp3" => "audio/mpeg".to_string(),
        "m4a" | "mp4" => "audio/mp4".to_string(),
        "opus" | "ogg" | "oga" => "audio/ogg".to_string(),
        "webm" => "audio/webm".to_string(),
        "wav" => "audio/wav".to_string(),
        other => format!("audio/{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedDownloader {
        tool: &'static str,
        fail_with: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedDownloader {
        fn succeeding(tool: &'static str) -> Self {
            Self { tool, fail_with: None, calls: AtomicUsize::new(0) }
        }

        fn failing(tool: &'static str, message: &'static str) -> Self {
            Self { tool, fail_with: Some(message), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl MediaDownloader for ScriptedDownloader {
        fn tool(&self) -> &'static str {
            self.tool
        }

        async fn download(&self, _media: &MediaRef) -> Result<DownloadedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(message) => Err(GranskaError::AudioDownload(message.into())),
                None => Ok(DownloadedAudio {
                    data: vec![1, 2, 3],
                    extension: "mp3".to_string(),
                    mime_type: "audio/mpeg".to_string(),
                    title: Some("a talk".to_string()),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_fallback_not_used_when_primary_succeeds() {
        let media = MediaRef::parse("dQw4w9WgXcQ").unwrap();
        let primary = ScriptedDownloader::succeeding("yt-dlp");
        let fallback = ScriptedDownloader::succeeding("youtube-dl");
        let (progress, _rx) = ProgressSender::channel();

        let audio = download_with_fallback(&primary, &fallback, &media, &progress)
            .await
            .unwrap();
        assert_eq!(audio.data, vec![1, 2, 3]);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_replaces_primary_error() {
        let media = MediaRef::parse("dQw4w9WgXcQ").unwrap();
        let primary = ScriptedDownloader::failing("yt-dlp", "primary broke");
        let fallback = ScriptedDownloader::failing("youtube-dl", "fallback broke");
        let (progress, _rx) = ProgressSender::channel();

        let err = download_with_fallback(&primary, &fallback, &media, &progress)
            .await
            .unwrap_err();
        // Only the fallback's message survives
        assert!(err.to_string().contains("fallback broke"));
        assert!(!err.to_string().contains("primary broke"));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_find_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123def45.m4a"), b"x").unwrap();

        let found = find_audio_file(dir.path(), "abc123def45").unwrap();
        assert_eq!(found.extension().and_then(|e| e.to_str()), Some("m4a"));

        assert!(find_audio_file(dir.path(), "missing00000").is_err());
    }

    #[test]
    fn test_extract_title() {
        let stdout = r#"{"id":"abc","title":"How Rivers Form","ext":"m4a"}"#;
        assert_eq!(extract_title(stdout), Some("How Rivers Form".to_string()));
        assert_eq!(extract_title("not json"), None);
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("mp3"), "audio/mpeg");
        assert_eq!(mime_for_extension("webm"), "audio/webm");
        assert_eq!(mime_for_extension("flac"), "audio/flac");
    }
}
