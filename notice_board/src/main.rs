use anyhow::Result;
use clap::Parser;
use notice_board::{api, config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let cfg = config::Config::load(&cli)?;
    let default_level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(data_dir = %cfg.data_dir.display(), "starting notice board");
    api::run_http_server(cfg).await
}
