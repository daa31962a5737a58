use clap::Parser;
use tracing::error;

use afftrack::cli::Cli;
use afftrack::runtime::modes::{self, Mode};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    afftrack::config::init_config_from(&cli.config);
    let config = afftrack::config::get_config();
    let _log_guard = afftrack::system::init_logging(&config.logging);

    match modes::detect_mode(cli.command.as_ref()) {
        #[cfg(feature = "server")]
        Mode::Server => {
            if let Err(e) = modes::run_server().await {
                error!("Server exited with error: {:#}", e);
                std::process::exit(1);
            }
        }
        #[cfg(feature = "cli")]
        Mode::Cli => {
            let Some(command) = cli.command else {
                return Ok(());
            };
            if let Err(e) = modes::run_cli(command).await {
                #[cfg(feature = "server")]
                eprintln!("{}", e.format_colored());
                #[cfg(not(feature = "server"))]
                eprintln!("{}", e.format_simple());
                std::process::exit(1);
            }
        }
        Mode::Unknown => {
            eprintln!("No execution mode available: build with the `server` or `cli` feature");
            std::process::exit(2);
        }
    }

    Ok(())
}
