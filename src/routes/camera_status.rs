use crate::server::SharedState;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CameraStatus {
    pub enabled: bool,
    pub model_loaded: bool,
    pub active_clients: usize,
}

pub async fn camera_status(State(state): State<SharedState>) -> impl IntoResponse {
    state.metrics.record_request("camera_status");

    let status = CameraStatus {
        enabled: state.config.camera.source.is_some(),
        model_loaded: state.detector.is_some(),
        active_clients: state.registry.active_clients(),
    };

    ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Json(status))
}
