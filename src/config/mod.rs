//! Configuration module for Granska.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{AnalysisPrompts, Prompts};
pub use settings::{
    AnalysisSettings, CacheSettings, CaptionSettings, GeneralSettings, PromptSettings,
    ServerSettings, Settings, TranscriptionSettings,
};
