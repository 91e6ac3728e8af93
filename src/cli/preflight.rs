//! Pre-flight checks before expensive operations.
//!
//! Validates that required credentials are present before starting
//! operations that would otherwise fail midway.

use crate::error::{GranskaError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Remote analysis needs a Gemini key. The audio fallback also wants an
    /// OpenAI key and a downloader, but captions can make both moot, so
    /// those are checked at run time.
    AnalyzeRemote,
    /// Uploaded files go straight to transcription, which needs both keys.
    AnalyzeUpload,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation) -> Result<()> {
    match operation {
        Operation::AnalyzeRemote => {
            check_api_key("GEMINI_API_KEY")?;
        }
        Operation::AnalyzeUpload => {
            check_api_key("GEMINI_API_KEY")?;
            check_api_key("OPENAI_API_KEY")?;
        }
    }
    Ok(())
}

/// Check that an API key is present in the environment.
fn check_api_key(name: &str) -> Result<()> {
    match std::env::var(name) {
        Ok(key) if !key.trim().is_empty() => Ok(()),
        Ok(_) => Err(GranskaError::Config(format!(
            "{name} is empty. Set it with: export {name}='...'"
        ))),
        Err(_) => Err(GranskaError::Config(format!(
            "{name} not set. Set it with: export {name}='...'"
        ))),
    }
}
