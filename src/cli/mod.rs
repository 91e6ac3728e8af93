//! CLI module for Granska.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Granska - Long-form Media Analysis
///
/// Turns long videos and audio files into structured analyses using captions,
/// direct model calls, or audio transcription, whichever works first.
/// The name "Granska" comes from the Swedish word for "examine closely."
#[derive(Parser, Debug)]
#[command(name = "granska")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a video or audio file and print the result
    Analyze {
        /// YouTube URL/ID, or local audio/video file path
        input: String,

        /// Analysis instruction
        #[arg(short, long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the analysis instruction from a file
        #[arg(long)]
        prompt_file: Option<String>,

        /// Language hint for captions and transcription (e.g. "en")
        #[arg(short, long)]
        language: Option<String>,

        /// Skip the direct-reference stage and go straight to audio transcription
        #[arg(long)]
        audio_first: bool,

        /// Bypass the result cache
        #[arg(long)]
        no_cache: bool,

        /// Write the analysis to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Start the HTTP analysis server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "analysis.model")
        key: String,
        /// Configuration value
        value: String,
    },

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
