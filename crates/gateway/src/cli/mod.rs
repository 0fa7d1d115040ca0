pub mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use hs_domain::config::Config;

/// Headspace — agent session observability and coordination.
#[derive(Debug, Parser)]
#[command(name = "headspace", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Check the configuration for errors without starting.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

const DEFAULT_CONFIG_PATH: &str = "headspace.toml";

/// Load the config file, falling back to built-in defaults when the file
/// does not exist. An explicit `--config` path must exist.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path))
}
