mod capture;
mod config;
mod engine;
mod error;
mod request;
mod service;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::SignerEngine;
use crate::service::ServiceState;

fn print_help() {
    println!(
        "\
hxsign v{}

Serves the request-signing routine of an obfuscated web bundle.

USAGE:
    hxsign [OPTIONS] [REQUEST_JSON]

ARGUMENTS:
    REQUEST_JSON    One-shot mode: a JSON object {{\"url\": ..., \"query\": {{...}}}}.
                    Prints the signed artifact and exits.
                    Without arguments the token service starts instead.

OPTIONS:
    -s, --server [PORT]    Run the token service (default port from config)
    -c, --config PATH      Path to TOML configuration [default: config/hxsign.toml]
    -h, --help             Print this help message and exit
    -V, --version          Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG     Log level filter for tracing
                 (e.g. debug, hxsign=debug,warn)

EXAMPLES:
    hxsign                                    # token service on the config port
    hxsign --server 9090                      # token service on port 9090
    hxsign '{{\"url\": \"/rest/v/profile/get\"}}'  # one-shot token on stdout",
        env!("CARGO_PKG_VERSION"),
    );
}

enum Mode {
    Server { port_override: Option<u16> },
    OneShot(String),
}

fn parse_args() -> Result<(Mode, String)> {
    let mut config_path = "config/hxsign.toml".to_string();
    let mut mode = Mode::Server {
        port_override: None,
    };

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("hxsign v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--server" | "-s" => {
                let port_override = match args.peek().and_then(|next| next.parse::<u16>().ok()) {
                    Some(port) => {
                        args.next();
                        Some(port)
                    }
                    None => None,
                };
                mode = Mode::Server { port_override };
            }
            "--config" | "-c" => {
                config_path = args
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
            }
            other => {
                mode = Mode::OneShot(other.to_string());
            }
        }
    }
    Ok((mode, config_path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let (mode, config_path) = parse_args()?;

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hxsign=info")),
        )
        .init();

    println!(
        r#"
   _              _
  | |__ __  _____(_) __ _ _ __
  | '_ \ \/ / __|| |/ _` | '_ \
  | | | |>  <\__ \| | (_| | | | |
  |_| |_/_/\_\___/|_|\__, |_| |_|
                     |___/   v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    info!("Loading configuration from {config_path}");
    let config = Config::load_or_default(&config_path)?;

    info!("Vendor bundle: {}", config.bundle.path.display());
    info!("Page base URL: {}", config.bundle.base_url);
    info!(
        "Interception rules: {}",
        config
            .capture
            .rules
            .iter()
            .map(|r| format!("{r:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Sandbox construction failures are the only fatal errors: without an
    // engine there is nothing to serve
    let engine = SignerEngine::spawn(config.clone()).map_err(|e| anyhow!("{e}"))?;
    let state = Arc::new(ServiceState::new(engine, &config));

    match mode {
        Mode::OneShot(raw_arg) => service::run_one_shot(&state, &raw_arg).await,
        Mode::Server { port_override } => {
            let port = port_override.unwrap_or(config.server.port);
            tokio::select! {
                result = service::http::serve(state, port) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, exiting");
                    Ok(())
                }
            }
        }
    }
}
