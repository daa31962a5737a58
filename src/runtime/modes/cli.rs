//! CLI mode
//!
//! One-shot administrative commands. Each command loads only what it needs:
//! `config generate` touches no database, `link sign` needs only the link secret.

use std::io::{self, BufRead, Write};
use std::path::Path;

use colored::Colorize;

use crate::cli::{ApiKeyCommands, Commands, ConfigCommands, LinkCommands};
use crate::errors::{AfftrackError, Result};
use crate::services::{ApiKeyService, LinkSigner};
use crate::storage::StorageFactory;

/// Run a CLI command from clap-parsed input
pub async fn run_cli(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Config {
            action: ConfigCommands::Generate { output_path, force },
        } => config_generate(output_path, force),
        Commands::ApiKey {
            action: ApiKeyCommands::Issue { advertiser, name },
        } => issue_api_key(&advertiser, &name).await,
        Commands::Link {
            action: LinkCommands::Sign { tracking_code },
        } => sign_link(&tracking_code),
        Commands::Serve => Err(AfftrackError::validation(
            "serve is handled by the server mode",
        )),
    }
}

fn config_generate(output_path: Option<String>, force: bool) -> Result<()> {
    let path = output_path.unwrap_or_else(|| "config.example.toml".to_string());

    // 检查文件是否存在，非 --force 模式下交互确认
    if !force && Path::new(&path).exists() {
        print!(
            "{} {} {}",
            "File already exists:".yellow(),
            path.blue(),
            "Overwrite? [y/N] ".yellow()
        );
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Aborted.".red());
            return Ok(());
        }
    }

    crate::config::StaticConfig::default()
        .save_to_file(&path)
        .map_err(|e| {
            AfftrackError::file_operation(format!("Unable to write configuration file: {}", e))
        })?;

    println!(
        "  {} {}",
        "Configuration file generated successfully".green(),
        path.blue()
    );
    println!(
        "  {}",
        "Set tracking.link_secret and admin.token before starting the server".yellow()
    );
    Ok(())
}

async fn issue_api_key(advertiser: &str, name: &str) -> Result<()> {
    let storage = StorageFactory::create().await?;
    let service = ApiKeyService::new(storage.clone());
    let (raw, model) = service.issue(Some(advertiser), name).await?;
    storage.close().await?;

    println!("{} {}", "API key issued:".green(), model.id.blue());
    println!("  {} {}", "advertiser:".dimmed(), advertiser);
    println!("  {} {}", "key:".dimmed(), raw.bold());
    println!(
        "  {}",
        "Store this key now, it cannot be shown again".yellow()
    );
    Ok(())
}

fn sign_link(tracking_code: &str) -> Result<()> {
    let config = crate::config::get_config();
    let signer = LinkSigner::from_config(&config.tracking);
    let signed = signer.sign(tracking_code)?;
    println!("/c/{}", signed);
    Ok(())
}
