//! Electra support bot binary.

use clap::Parser;
use electra::{BotConfig, Runtime};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Electra: WhatsApp customer-support bot.
#[derive(Parser)]
#[command(name = "electra", version, about)]
struct Cli {
    /// Path to TOML configuration file (defaults to the user config dir if present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective configuration as TOML (secrets redacted) and exit.
    #[arg(long)]
    print_config: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<BotConfig> {
    let mut config = match &cli.config {
        Some(path) => BotConfig::from_file(path)?,
        None => {
            let default_path = BotConfig::default_config_path();
            if default_path.is_file() {
                BotConfig::from_file(&default_path)?
            } else {
                BotConfig::default()
            }
        }
    };
    config.apply_env();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Install the global subscriber. The returned guard flushes the log file on drop.
fn init_tracing(config: &BotConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("electra=info,tower_http=warn"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "electra.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.print_config {
        let mut shown = config.clone();
        for secret in [
            &mut shown.generator.api_key,
            &mut shown.whatsapp.access_token,
            &mut shown.server.admin_token,
        ] {
            if !secret.is_empty() {
                *secret = "<redacted>".to_owned();
            }
        }
        print!("{}", toml::to_string_pretty(&shown)?);
        return Ok(());
    }

    let _guard = init_tracing(&config);
    info!(version = env!("CARGO_PKG_VERSION"), "starting electra");

    let runtime = Runtime::from_config(config)?;
    runtime.run().await
}
