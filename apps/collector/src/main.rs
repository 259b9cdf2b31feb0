//! busrelay collector entry point.

mod app;
mod config;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Before logging, so RUST_LOG may come from .env. A missing file is normal.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting busrelay collector"
    );

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("BUSRELAY_CONFIG").map(PathBuf::from));
    let config = config::Config::load(path.as_deref())?;
    tracing::info!(
        port = %config.serial_port,
        server = %config.server_ws_url,
        batch = config.batch_enabled,
        batch_size = config.batch_size,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("collector shut down cleanly");
    Ok(())
}
