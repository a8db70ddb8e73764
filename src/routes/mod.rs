mod api_proxy;
mod camera_feed;
pub(crate) mod camera_status;
mod media;
mod metrics;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub const API_PREFIX: &str = "/api/";

/// Prefix routes in declaration order. Anything else falls through to the
/// static document root.
pub fn relay_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/", get(api_proxy::api_proxy))
        .route("/api/{*rest}", get(api_proxy::api_proxy))
        .route("/videos/{*name}", get(media::video))
        .route("/models/{*name}", get(media::model))
        .route("/camera_feed", get(camera_feed::camera_feed))
        .route("/camera_status", get(camera_status::camera_status))
        .route("/metrics", get(metrics::metrics_handler))
}
