//! Wires the assembler, its WebSocket service and the server together.

use std::sync::Arc;
use std::time::Duration;

use chunkferry_assembler::Assembler;
use chunkferry_assembler_server::{AssemblerServer, AssemblerService, ServerConfig};

use crate::config::Config;

/// Runs the assembler until SIGINT or a server error.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let assembler = Arc::new(Assembler::open_dir(&config.storage_dir).await?);
    tracing::info!(storage_dir = %config.storage_dir.display(), "assembler storage opened");

    let server_config = ServerConfig {
        bind: config.bind,
        port: config.port,
        max_message_size: config.max_message_size,
    };
    let server = AssemblerServer::new(server_config, AssemblerService::new(assembler));

    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    // Wait for the server to bind.
    let port = loop {
        if server_task.is_finished() {
            break 0;
        }
        let p = server.port().await;
        if p > 0 {
            break p;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    if port > 0 {
        tracing::info!(bind = %config.bind, port, "assembler listening");
    }

    tokio::select! {
        res = &mut server_task => {
            res??;
            tracing::warn!("server stopped unexpectedly");
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    server.shutdown();
    match tokio::time::timeout(Duration::from_secs(5), server_task).await {
        Ok(res) => res??,
        Err(_) => tracing::warn!("server did not stop within 5s"),
    }
    Ok(())
}
