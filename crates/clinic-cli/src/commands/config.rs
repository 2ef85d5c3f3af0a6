//! Config show/validate command.

use clinic_core::{Config, REDACTED, redact_json};
use serde_json::Value;

use super::Context;
use crate::ui;

/// Config actions.
#[derive(Debug, Clone, Copy, Default)]
pub enum ConfigAction {
    /// Print the effective configuration.
    #[default]
    Show,
    /// Check values and the signing secret.
    Validate,
}

/// Run the config command.
///
/// # Errors
///
/// Returns error if the configuration is invalid.
pub fn run_config(ctx: &Context, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            ui::kv("config file", &Config::default_path().display().to_string());
            ui::kv("data dir", &ctx.data_dir.display().to_string());
            println!("{}", serde_json::to_string_pretty(&redacted(&ctx.config)?)?);
        }
        ConfigAction::Validate => {
            ctx.config.validate()?;
            if let Err(e) = ctx.config.auth.signing_secret() {
                ui::warning(&e.to_string());
                ui::info("Run 'clinic secret' to generate one.");
                anyhow::bail!("Configuration is not usable for issuing tokens");
            }
            ui::success("Configuration is valid");
        }
    }
    Ok(())
}

/// The configuration as JSON with the signing secret masked.
fn redacted(config: &Config) -> anyhow::Result<Value> {
    let mut value = redact_json(&serde_json::to_value(config)?);
    if let Some(secret) = value.pointer_mut("/auth/jwtSecret") {
        *secret = Value::String(REDACTED.to_string());
    }
    Ok(value)
}
