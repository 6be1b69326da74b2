// CLI module - command-line argument parsing and handlers
//
// Without a subcommand the relay starts serving. Subcommands for
// configuration management:
// - config --path: Show which config file would be read
// - config --show: Display effective configuration as TOML
// - config --check: Load and validate the configuration, then exit

use crate::config::{Config, ConfigOverrides, VERSION};
use crate::proxy::routing::RouteTable;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Reasoning Relay - rewrites reasoning tags in OpenAI-compatible responses
#[derive(Parser, Debug)]
#[command(name = "reasoning-relay")]
#[command(version = VERSION)]
#[command(about = "Proxy for OpenAI-compatible backends that rewrites reasoning tags", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/reasoning-relay/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:3000
    #[arg(short, long, global = true)]
    pub bind: Option<String>,

    /// Backend for requests no route claims
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Validate the configuration and exit
        #[arg(long)]
        check: bool,
    },
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            path: self.config.clone(),
            bind: self.bind.clone(),
            target: self.target.clone(),
        }
    }
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_command(cli: &Cli) -> Result<bool> {
    let Some(Commands::Config { show, path, check }) = &cli.command else {
        return Ok(false); // No subcommand, run normal proxy
    };
    let overrides = cli.overrides();

    if *path {
        handle_config_path(&overrides)?;
    } else if *show {
        handle_config_show(&overrides)?;
    } else if *check {
        handle_config_check(&overrides)?;
    } else {
        // No flag provided, show help
        println!("Usage: reasoning-relay config [--show|--path|--check]");
        println!();
        println!("Options:");
        println!("  --show    Display effective configuration");
        println!("  --path    Show config file path");
        println!("  --check   Validate the configuration and exit");
    }
    Ok(true)
}

fn handle_config_path(overrides: &ConfigOverrides) -> Result<()> {
    let (path, _) = Config::resolve_path(overrides);
    let path = path.context("Could not determine config path")?;
    println!("{}", path.display());
    Ok(())
}

fn handle_config_show(overrides: &ConfigOverrides) -> Result<()> {
    let config = Config::load(overrides)?;

    println!("# Effective configuration (flags > env > file > defaults)");
    match &config.source {
        Some(path) => println!("# Source: {}", path.display()),
        None => println!("# Source: defaults (no config file)"),
    }
    println!();
    print!("{}", config.to_toml());
    Ok(())
}

fn handle_config_check(overrides: &ConfigOverrides) -> Result<()> {
    let config = Config::load(overrides)?;
    // Regex compilation happens here, same as at startup
    let routes = RouteTable::from_config(&config.effective_routes())?;

    match &config.source {
        Some(path) => println!("{}: OK", path.display()),
        None => println!("defaults: OK"),
    }
    for route in routes.iter() {
        println!("  {} -> {}", route.name, route.target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_before_and_after_subcommand() {
        let cli = Cli::parse_from([
            "reasoning-relay",
            "--bind",
            "0.0.0.0:9000",
            "config",
            "--check",
            "--config",
            "/tmp/relay.toml",
        ]);

        let overrides = cli.overrides();
        assert_eq!(overrides.bind.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(overrides.path, Some(PathBuf::from("/tmp/relay.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Config { check: true, .. })
        ));
    }

    #[test]
    fn test_no_subcommand_runs_proxy() {
        let cli = Cli::parse_from(["reasoning-relay", "-t", "http://localhost:8000"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.overrides().target.as_deref(), Some("http://localhost:8000"));
        assert!(!handle_command(&cli).unwrap());
    }
}
