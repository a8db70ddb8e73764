use crate::camera::OpenCvCameras;
use crate::config::Config;
use crate::detection::load_detector;
use crate::server::{HttpServer, SharedState};

use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    match &config.camera.source {
        Some(source) => tracing::info!("Camera streaming enabled from {}", source),
        None => tracing::info!("Camera streaming disabled"),
    }

    // Loaded exactly once; never retried while the process runs.
    let detector = load_detector(&config.detection);

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = SharedState::new(
        config.clone(),
        detector,
        Arc::new(OpenCvCameras),
        shutdown_tx.clone(),
    )?;

    let server = HttpServer::new(state, &config.server).await?;
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
