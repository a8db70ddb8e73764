use super::API_PREFIX;
use crate::{proxy::ProxyError, server::SharedState};
use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn api_proxy(State(state): State<SharedState>, uri: Uri) -> Result<Response, ProxyError> {
    state.metrics.record_request("api");

    let target = uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or_else(|| uri.path());
    let rest = target.strip_prefix(API_PREFIX).unwrap_or_default();

    match state.upstream.forward(rest).await {
        Ok(body) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            body,
        )
            .into_response()),
        Err(e) => {
            tracing::warn!("Upstream request for {} failed: {}", rest, e);
            state.metrics.record_upstream_failure();
            Err(e)
        }
    }
}
