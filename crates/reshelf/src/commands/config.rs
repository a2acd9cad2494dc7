//! Configuration inspection commands.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::{ConfigAction, ConfigCommand};
use crate::config::Config;

pub fn execute(cmd: ConfigCommand, config: &Config, explicit: Option<&Path>) -> Result<()> {
    match cmd.action {
        ConfigAction::Show => {
            let shown =
                toml::to_string_pretty(&config.redacted()).context("Failed to render config")?;
            println!("{}", shown);
        }
        ConfigAction::Path => {
            let path = Config::path_for(explicit);
            let state = if path.exists() {
                "exists".green()
            } else {
                "not found, using defaults".yellow()
            };
            println!("{} ({})", path.display(), state);
        }
    }
    Ok(())
}
