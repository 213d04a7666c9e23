use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use opsdeck_core::config::{Config, WarnLevel};
use opsdeck_core::paths;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (file merged over defaults)
    Show,

    /// Write config.yaml with every default filled in
    Init {
        /// Overwrite an existing config.yaml
        #[arg(long)]
        force: bool,
    },

    /// Validate the config for common mistakes
    Validate,

    /// Print the config file location
    Path,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(state: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(state, json),
        ConfigSubcommand::Init { force } => init(state, force, json),
        ConfigSubcommand::Validate => validate(state, json),
        ConfigSubcommand::Path => {
            let path = paths::config_path(state);
            if json {
                print_json(&serde_json::json!({ "path": path }))?;
            } else {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

fn show(state: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(state).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

fn init(state: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    let path = paths::config_path(state);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default()
        .save(state)
        .with_context(|| format!("failed to write {}", path.display()))?;
    if json {
        print_json(&serde_json::json!({ "path": path, "created": true }))?;
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn validate(state: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(state).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
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
