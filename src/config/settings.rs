//! Configuration settings for Granska.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub analysis: AnalysisSettings,
    pub captions: CaptionSettings,
    pub transcription: TranscriptionSettings,
    pub cache: CacheSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.granska".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Analysis pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Completion model for analysis calls.
    pub model: String,
    /// Transcripts longer than this many characters are map-reduced.
    pub chunk_limit: usize,
    /// Concurrent map calls per batch.
    pub batch_size: usize,
    /// Pause between batches, in milliseconds.
    pub batch_pause_ms: u64,
    /// Outer deadline for one pipeline run, in seconds.
    pub deadline_seconds: u64,
    /// Skip the direct video stage and go straight to audio transcription.
    pub audio_first: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            model: crate::completion::DEFAULT_MODEL.to_string(),
            chunk_limit: 100_000,
            batch_size: 3,
            batch_pause_ms: 200,
            deadline_seconds: 300, // 5 minutes, sized for long media
            audio_first: false,
        }
    }
}

/// Caption retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    /// Language tried first.
    pub primary_language: String,
    /// Language tried once if the primary has no track.
    pub fallback_language: String,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            primary_language: "en".to_string(),
            fallback_language: "es".to_string(),
        }
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Whisper model to use.
    pub model: String,
    /// Language hint passed to the transcriber. None lets it auto-detect.
    pub language: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: crate::transcription::DEFAULT_MODEL.to_string(),
            language: None,
        }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Disable to always run the full pipeline.
    pub enabled: bool,
    /// Path to the SQLite cache database.
    pub sqlite_path: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sqlite_path: "~/.granska/cache.db".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Maximum accepted upload size, in megabytes.
    pub max_upload_mb: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            max_upload_mb: 512,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::GranskaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("granska")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite cache path.
    pub fn cache_path(&self) -> PathBuf {
        Self::expand_path(&self.cache.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.analysis.chunk_limit, 100_000);
        assert_eq!(settings.analysis.batch_size, 3);
        assert_eq!(settings.analysis.deadline_seconds, 300);
        assert_eq!(settings.captions.primary_language, "en");
        assert!(settings.cache.enabled);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [analysis]
            batch_size = 5

            [captions]
            primary_language = "ko"
            "#,
        )
        .unwrap();

        assert_eq!(settings.analysis.batch_size, 5);
        assert_eq!(settings.analysis.chunk_limit, 100_000);
        assert_eq!(settings.captions.primary_language, "ko");
        assert_eq!(settings.captions.fallback_language, "es");
        assert_eq!(settings.server.port, 8787);
    }
}
