//! otaflash command-line entry point.

mod app;
mod config;
mod console;

use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: otaflash <firmware.bin>")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting otaflash");

    let config = config::Config::load()?;
    tracing::info!(device = %config.device_url, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, path))
}
