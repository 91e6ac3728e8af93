//! Prompt templates for Granska.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub analysis: AnalysisPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for transcript analysis.
///
/// `single` is used when a transcript fits in one model call, `map` once per
/// segment of a long transcript, and `reduce` to merge the per-segment
/// digests into the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPrompts {
    pub single: String,
    pub map: String,
    pub reduce: String,
}

impl Default for AnalysisPrompts {
    fn default() -> Self {
        Self {
            single: "{{instruction}}\n\n---\n\n{{transcript}}".to_string(),

            map: r#"You are an expert at analyzing long recordings. Below is one segment of a much longer transcript.

Produce a detailed digest of this segment in the following structure:
- Core summary (5-10 sentences)
- Key terms and repeated messages
- Notable moments worth quoting (claims, figures, calls to action)
- Anything unusual

Segment content:

{{chunk}}"#
                .to_string(),

            reduce: r#"Below are per-segment digests of one long recording ({{count}} segments in total).
Combine all of them into a single final report that answers the original request, following that request's output format exactly. Do not mention segments or this two-step process.

[Original request]
{{instruction}}

[Per-segment digests]
{{digests}}"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from defaults, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let analysis_path = custom_path.join("analysis.toml");
            if analysis_path.exists() {
                let content = std::fs::read_to_string(&analysis_path)?;
                prompts.analysis = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config
    /// variables. Provided variables take precedence.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
