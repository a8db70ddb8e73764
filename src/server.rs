use crate::{
    camera::CameraProvider,
    config::{Config, ServerConfig},
    detection::Detector,
    files::{AllowedDir, Delivery},
    proxy::UpstreamClient,
    registry::SessionRegistry,
    routes::relay_routes,
    telemetry::Metrics,
};
use axum::Router;
use std::sync::Arc;
use tokio::{
    net::TcpListener,
    sync::broadcast::{Receiver, Sender},
    task::JoinHandle,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Everything a handler may touch. Only `registry` is mutated after startup.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
    pub detector: Option<Arc<dyn Detector>>,
    pub cameras: Arc<dyn CameraProvider>,
    pub upstream: UpstreamClient,
    pub videos: AllowedDir,
    pub models: AllowedDir,
    pub metrics: Arc<Metrics>,
    pub shutdown_tx: Sender<()>,
}

impl SharedState {
    pub fn new(
        config: Config,
        detector: Option<Arc<dyn Detector>>,
        cameras: Arc<dyn CameraProvider>,
        shutdown_tx: Sender<()>,
    ) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let metrics = Arc::new(Metrics::new()?);
        let videos = AllowedDir::new(&config.media.videos_dir, "video/mp4", Delivery::Inline)
            .with_extension("mp4");
        let models = AllowedDir::new(
            &config.media.models_dir,
            "application/octet-stream",
            Delivery::Attachment,
        );

        Ok(Self {
            config: Arc::new(config),
            registry: SessionRegistry::new(),
            detector,
            cameras,
            upstream,
            videos,
            models,
            metrics,
            shutdown_tx,
        })
    }
}

pub fn build_router(state: SharedState) -> Router {
    let static_files = ServeDir::new(&state.config.media.document_root);

    relay_routes()
        .fallback_service(static_files)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let router = build_router(state);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting relay on {}", self.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
