//! Registry proxy CLI binary
//!
//! Runs the proxy, sends a one-off analytics report, or prints the effective
//! configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use registry_proxy::{
    mailer::SmtpDelivery, run_server, AppState, Config, ReportDelivery, DEFAULT_CONFIG_FILE,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "registry-proxy")]
#[command(about = "Docker registry proxy with pull analytics and daily email reports")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON); defaults apply when it does not exist
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,

        /// Upstream registry host, e.g. ghcr.io
        #[arg(long)]
        registry: Option<String>,
    },

    /// Send the analytics report now and exit
    SendReport,

    /// Validate and print the effective configuration
    CheckConfig,
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?
        .with_env_overrides();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = proxy_logging::init_subscriber();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Start {
            host,
            port,
            registry,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(registry) = registry {
                config.upstream.registry_host = registry;
                config.upstream.base_url = None;
            }
            run_server(config).await
        }

        Commands::SendReport => {
            config.validate().context("Invalid configuration")?;
            let delivery: Arc<dyn ReportDelivery> = Arc::new(SmtpDelivery::from_config(&config.smtp)?);
            let state = AppState::with_delivery(config, Some(delivery))?;
            let recipients = state.reporter.send_report().await?;
            info!(recipients, "Report sent");
            println!("Report sent to {recipients} recipient(s)");
            Ok(())
        }

        Commands::CheckConfig => {
            config.validate().context("Invalid configuration")?;
            if !config.smtp.sender_password.is_empty() {
                config.smtp.sender_password = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
