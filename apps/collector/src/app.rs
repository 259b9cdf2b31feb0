//! Wires the serial source, uplink and collector together.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use busrelay_collector::{Collector, SerialSource};
use busrelay_uplink::UplinkManager;

use crate::config::Config;

/// Runs until Ctrl+C, then flushes what is buffered and closes the uplink.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let settings = config.serial_settings();
    let source = tokio::select! {
        opened = SerialSource::open(&settings) => opened
            .with_context(|| format!("cannot open serial port {}", settings.path))?,
        _ = cancel.cancelled() => {
            info!("interrupted while opening the serial port");
            return Ok(());
        }
    };
    info!(port = %settings.path, baud = settings.baud_rate, "serial port open");

    let uplink = UplinkManager::new(config.link_config());
    let mut collector = Collector::new(
        source,
        uplink,
        config.batch_config(),
        config.collector_config(),
    );

    collector.run(cancel).await;
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                cancel.cancel();
            }
            Err(e) => error!("cannot listen for Ctrl+C: {e}"),
        }
    });
}
