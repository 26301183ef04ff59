//! chirpgate-mcp - Post, search and delete on X (Twitter) as MCP tools
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout. Logs go to stderr.

mod jsonrpc;
mod server;
mod tools;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use libchirpgate::credentials::{open_token_store, CredentialStore};
use libchirpgate::logging::{LogFormat, LoggingConfig};
use libchirpgate::{Broker, ChirpgateError, Config};

use crate::server::McpServer;

#[derive(Parser, Debug)]
#[command(name = "chirpgate-mcp")]
#[command(version)]
#[command(about = "X (Twitter) post, search and delete tools over MCP stdio", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log format (text, json, pretty)
    #[arg(long, env = "CHIRPGATE_LOG_FORMAT")]
    log_format: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate configuration and credentials, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    if let Some(format) = &cli.log_format {
        match format.parse::<LogFormat>() {
            Ok(format) => logging.format = format,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(3);
            }
        }
    }
    logging.verbose |= cli.verbose;
    logging.init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<ChirpgateError>()
            .map(ChirpgateError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn load_config(path: Option<&Path>) -> Result<(Config, Arc<dyn CredentialStore>)> {
    let mut config = match path {
        Some(path) => {
            let mut config = Config::load_from_path(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_env()?;
            config
        }
        None => Config::load()?,
    };
    config.validate()?;

    let store = open_token_store(&mut config)?;
    Ok((config, store))
}

async fn run(cli: Cli) -> Result<()> {
    let (config, store) = load_config(cli.config.as_deref())?;

    let broker = Broker::from_config(&config, store)?;
    broker.refresh_if_needed().await?;

    let scheme = broker.scheme().await;
    if cli.check {
        println!("Configuration OK ({} authentication)", scheme);
        return Ok(());
    }

    info!("{} {} ready ({} authentication)", server::SERVER_NAME, server::SERVER_VERSION, scheme);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    McpServer::new(broker).serve(stdin, stdout).await
}
