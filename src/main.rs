mod config;
mod dates;
mod error;
mod historical;
mod logging;
mod provider;
mod realtime;
mod stats;
mod transport;
mod types;
mod venue;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::{load_provider_record, Settings};
use crate::logging::LogConfig;
use crate::provider::{bind, BoundProvider, ProviderDeps};
use crate::types::DataMode;

/// Fetch market data from the provider named by `PROVIDER_NAME`.
#[derive(Debug, Parser)]
#[command(name = "market-feed", version)]
struct Cli {
    /// Stream live data or fetch a historical range.
    #[arg(long, value_enum)]
    data_type: DataMode,
}

async fn run(mode: DataMode, settings: &Settings) -> Result<()> {
    tracing::info!(provider = %settings.provider_name, mode = mode.as_str(), "using provider");

    let record = load_provider_record(&settings.config_path, &settings.provider_name)
        .with_context(|| format!("load provider config from {}", settings.config_path))?;
    let deps = ProviderDeps::live()?;

    match bind(mode, &record, &deps)? {
        BoundProvider::Realtime(mut p) => {
            p.connect().await.context("real-time data provider")?;
            tracing::info!(provider = %p.kind(), "real-time session ended");
        }
        BoundProvider::Historical(p) => {
            if settings.check_market_status {
                let status = p.is_market_open().await;
                tracing::debug!(provider = %p.kind(), is_open = status.is_open, "market status");
            }

            let (start, end) = settings.historical_range()?;
            let data = p
                .get_historical_data(start, end)
                .await
                .context("historical data provider")?;
            tracing::info!(bytes = data.to_string().len(), "historical data received");
            println!("{}", data);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let log = logging::init(&LogConfig::new(&settings.log_dir))?;
    tracing::info!(path = %log.path().display(), "log sink opened");

    if let Err(e) = run(cli.data_type, &settings).await {
        tracing::error!(error = %format!("{:#}", e), "an error occurred");
    }
    Ok(())
}
