//! Progress events and the channel they travel on.
//!
//! Pipeline components report non-terminal progress through a cloned
//! [`ProgressSender`]; the single consumer (SSE handler or CLI renderer)
//! forwards events to the caller and emits exactly one terminal event per
//! run, always last. Percent values are a reporting convention, not a
//! validated contract; later stages may briefly report lower numbers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Stage labels carried by progress events.
pub mod stage {
    pub const CACHE: &str = "cache";
    pub const CAPTIONS: &str = "captions";
    pub const DIRECT: &str = "direct-analysis";
    pub const DOWNLOAD: &str = "audio-download";
    pub const TRANSCRIBE: &str = "transcription";
    pub const ANALYZE: &str = "analysis";
    pub const FINALIZE: &str = "finalize";
}

/// One record on the outbound progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        stage: String,
        percent: u8,
        detail: String,
    },
    Result {
        analysis: String,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn progress(stage: &str, percent: u8, detail: impl Into<String>) -> Self {
        Self::Progress {
            stage: stage.to_string(),
            percent,
            detail: detail.into(),
        }
    }

    pub fn result(analysis: impl Into<String>) -> Self {
        Self::Result { analysis: analysis.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// Terminal events end the stream; exactly one is sent per run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

/// Cloneable handle components use to report progress.
///
/// Sends are fire-and-forget: once the consumer goes away (client
/// disconnect), events are dropped silently and in-flight work continues.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Create a sender together with its consuming end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report non-terminal progress. Components should use only this.
    pub fn update(&self, stage: &str, percent: u8, detail: impl Into<String>) {
        self.emit(ProgressEvent::progress(stage, percent, detail));
    }

    /// Send a raw event. Reserved for the run driver, which emits the
    /// single terminal event from the pipeline's result.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}
