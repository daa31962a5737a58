//! Command-line interface definitions using clap
//!
//! This module defines the CLI structure for afftrack using clap's derive macros.

use clap::{Parser, Subcommand};

/// afftrack - affiliate click tracking, postback attribution and webhook delivery
#[derive(Parser)]
#[command(name = "afftrack")]
#[command(version)]
#[command(about = "Affiliate click tracking and webhook delivery service", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short = 'c', global = true, default_value = "config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default when no command is given)
    Serve,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Manage advertiser API keys
    ApiKey {
        #[command(subcommand)]
        action: ApiKeyCommands,
    },

    /// Signed tracking links
    Link {
        #[command(subcommand)]
        action: LinkCommands,
    },
}

/// Configuration management commands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Generate {
        /// Output path (default: config.example.toml)
        output_path: Option<String>,

        /// Force overwrite without confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum ApiKeyCommands {
    /// Issue a new API key; the raw key is printed only once
    Issue {
        /// Advertiser the key is bound to
        #[arg(long)]
        advertiser: String,

        /// Human readable label
        #[arg(long, default_value = "default")]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum LinkCommands {
    /// Print a freshly signed click path for a tracking code
    Sign {
        tracking_code: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_server() {
        let cli = Cli::try_parse_from(["afftrack"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, "config.toml");
    }

    #[test]
    fn test_parse_api_key_issue() {
        let cli = Cli::try_parse_from([
            "afftrack",
            "-c",
            "/etc/afftrack.toml",
            "api-key",
            "issue",
            "--advertiser",
            "adv-1",
        ])
        .unwrap();
        assert_eq!(cli.config, "/etc/afftrack.toml");
        match cli.command {
            Some(Commands::ApiKey {
                action: ApiKeyCommands::Issue { advertiser, name },
            }) => {
                assert_eq!(advertiser, "adv-1");
                assert_eq!(name, "default");
            }
            _ => panic!("expected api-key issue"),
        }
    }

    #[test]
    fn test_parse_config_generate_force() {
        let cli =
            Cli::try_parse_from(["afftrack", "config", "generate", "out.toml", "--force"]).unwrap();
        match cli.command {
            Some(Commands::Config {
                action: ConfigCommands::Generate { output_path, force },
            }) => {
                assert_eq!(output_path.as_deref(), Some("out.toml"));
                assert!(force);
            }
            _ => panic!("expected config generate"),
        }
    }

    #[test]
    fn test_link_sign_requires_code() {
        assert!(Cli::try_parse_from(["afftrack", "link", "sign"]).is_err());
    }
}
