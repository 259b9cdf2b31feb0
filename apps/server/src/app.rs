use std::sync::Arc;

use tracing::{error, info};

use busrelay_hub::RelayServer;

use crate::config::Config;

/// Serves until Ctrl+C. A bind failure ends the process with an error.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = RelayServer::new(config.server_config());
    info!(host = %config.host, port = config.port, "relay server starting");

    let mut task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    tokio::select! {
        finished = &mut task => {
            finished??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("cannot listen for Ctrl+C: {e}");
                task.await??;
                return Ok(());
            }
            info!("received Ctrl+C, shutting down");
        }
    }

    server.shutdown();
    task.await??;
    Ok(())
}
