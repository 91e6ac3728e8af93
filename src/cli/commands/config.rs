//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: Settings) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Set { key, value } => {
            let updated = set_value(&settings, key, value)?;
            updated.save()?;
            Output::success(&format!("Set {} = {}", key, value));
            Output::info(&format!(
                "Saved to {}",
                Settings::default_config_path().display()
            ));
        }

        ConfigAction::Edit => {
            let config_path = Settings::default_config_path();

            // Create default config if it doesn't exist
            if !config_path.exists() {
                settings.save()?;
                Output::info(&format!("Created default config at {:?}", config_path));
            }

            // Try to open in editor
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());

            Output::info(&format!("Opening config in {}...", editor));

            let status = std::process::Command::new(&editor)
                .arg(&config_path)
                .status();

            match status {
                Ok(s) if s.success() => {
                    Output::success("Config saved.");
                }
                Ok(_) => {
                    Output::warning("Editor exited with non-zero status.");
                }
                Err(e) => {
                    Output::error(&format!("Failed to open editor: {}", e));
                    Output::info(&format!("Config file is at: {:?}", config_path));
                }
            }
        }

        ConfigAction::Path => {
            let config_path = Settings::default_config_path();
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

/// Apply one dotted-key assignment and revalidate the whole config, so a
/// wrongly-typed value is rejected before anything is written.
fn set_value(settings: &Settings, key: &str, value: &str) -> Result<Settings> {
    let mut table = toml::Table::try_from(settings)
        .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
    set_key(&mut table, key, parse_value(value))?;
    toml::Value::Table(table)
        .try_into()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))
}

fn set_key(table: &mut toml::Table, key: &str, value: toml::Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let (leaf, sections) = parts
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("Empty config key"))?;

    let mut current = table;
    for part in sections {
        current = current
            .get_mut(*part)
            .and_then(|v| v.as_table_mut())
            .ok_or_else(|| anyhow::anyhow!("Unknown config section: {}", part))?;
    }

    if !current.contains_key(*leaf) {
        return Err(anyhow::anyhow!(
            "Unknown config key: {} (see 'granska config show' for valid keys)",
            key
        ));
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

/// Interpret the raw CLI string as the most specific TOML value it parses as.
fn parse_value(raw: &str) -> toml::Value {
    if let Ok(boolean) = raw.parse::<bool>() {
        return toml::Value::Boolean(boolean);
    }
    if let Ok(integer) = raw.parse::<i64>() {
        return toml::Value::Integer(integer);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return toml::Value::Float(float);
    }
    toml::Value::String(raw.to_string())
}
