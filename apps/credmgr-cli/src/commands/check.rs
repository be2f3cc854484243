use anyhow::{Context, Result};

use crate::config::AppConfig;

/// Validate the configuration and print it with secrets redacted.
pub fn run(config: &AppConfig) -> Result<()> {
    config
        .credentials
        .validate()
        .context("invalid credentials configuration")?;
    tracing::info!("configuration is valid");
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
