use clap::Parser;
use ecg_digitize::config::{Args, DigitizeConfig, ServerConfig};
use ecg_digitize::server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from(args);
    let digitize_config = match &config.config_path {
        Some(path) => {
            tracing::info!("Loading pipeline configuration from {}", path.display());
            DigitizeConfig::from_json_file(path)?
        }
        None => DigitizeConfig::default(),
    };

    tracing::info!(
        "Starting ecg-digitize-server v{}",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("Binding to {}:{}", config.host, config.port);

    server::run(config, digitize_config).await
}
