use crate::{files::FileServeError, server::SharedState};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use tracing::instrument;

#[instrument(skip(state, headers))]
pub async fn video(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, FileServeError> {
    state.metrics.record_request("videos");
    state.videos.serve(&name, &headers).await
}

#[instrument(skip(state, headers))]
pub async fn model(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, FileServeError> {
    state.metrics.record_request("models");
    state.models.serve(&name, &headers).await
}
