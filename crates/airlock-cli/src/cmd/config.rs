use crate::output::print_json;
use airlock_core::config::{Config, WarnLevel};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate tolerances, backoff policy and scheduler settings
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
