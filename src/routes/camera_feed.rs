use crate::{
    camera::{CameraError, CaptureSettings},
    server::SharedState,
    stream::{CameraSession, StreamSettings, CONTENT_TYPE},
};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum CameraFeedError {
    #[error("Camera streaming is disabled")]
    Disabled,
    #[error("Camera unavailable: {0}")]
    Unavailable(#[from] CameraError),
    #[error("Camera worker failed: {0}")]
    Worker(String),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

impl IntoResponse for CameraFeedError {
    fn into_response(self) -> Response {
        let status = match self {
            CameraFeedError::Disabled | CameraFeedError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CameraFeedError::Worker(_) | CameraFeedError::HttpBuilderError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[instrument(skip(state))]
pub async fn camera_feed(State(state): State<SharedState>) -> Result<Response, CameraFeedError> {
    state.metrics.record_request("camera_feed");

    let Some(source) = state.config.camera.source.clone() else {
        return Err(CameraFeedError::Disabled);
    };

    // Counted before acquisition; the guard rolls the count back on any early return.
    let guard = state.registry.begin();

    let cameras = state.cameras.clone();
    let capture_settings = CaptureSettings::from(&state.config.camera);
    let capture = tokio::task::spawn_blocking(move || cameras.open(&source, &capture_settings))
        .await
        .map_err(|e| CameraFeedError::Worker(e.to_string()))?
        .map_err(|e| {
            tracing::warn!("Camera session refused: {}", e);
            CameraFeedError::Unavailable(e)
        })?;

    let settings = StreamSettings {
        confidence_threshold: state.config.detection.confidence_threshold,
        jpeg_quality: state.config.camera.jpeg_quality,
        watermark: state.config.camera.watermark.clone(),
        frame_delay: Duration::from_millis(state.config.camera.get_stream_delay_ms()),
    };

    let session = CameraSession::new(
        capture,
        guard,
        state.detector.clone(),
        settings,
        state.metrics.clone(),
    );
    let body = Body::from_stream(session.into_stream(state.shutdown_tx.subscribe()));

    Response::builder()
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| CameraFeedError::HttpBuilderError(e.to_string()))
}
