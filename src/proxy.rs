use crate::config::UpstreamConfig;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Failed to build upstream client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("{0}")]
    Upstream(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_GATEWAY,
            [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Pass-through client for the fixed upstream REST host. Every call is
/// forwarded fresh and never retried.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ProxyError::ClientBuild)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Builds the upstream URL for the part of the request path that follows
    /// the proxy prefix, query string included.
    pub fn upstream_url(&self, rest: &str) -> String {
        format!("{}/{}", self.base_url, rest.trim_start_matches('/'))
    }

    #[instrument(skip(self))]
    pub async fn forward(&self, rest: &str) -> Result<Bytes, ProxyError> {
        let url = self.upstream_url(rest);
        tracing::debug!("Forwarding to {}", url);

        let response = self.http.get(&url).send().await?.error_for_status()?;
        let body = response.bytes().await?;

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            base_url: base_url.into(),
            timeout_secs: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_upstream_url() {
        let client = client("https://api.example.com/rest/v1/satellite/");

        assert_eq!(
            client.upstream_url("positions/25544/41.7/-86.2/0/1/&apiKey=abc"),
            "https://api.example.com/rest/v1/satellite/positions/25544/41.7/-86.2/0/1/&apiKey=abc"
        );
        assert_eq!(
            client.upstream_url("above/1/2?x=1"),
            "https://api.example.com/rest/v1/satellite/above/1/2?x=1"
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{}", addr))
            .forward("foo/bar")
            .await
            .unwrap_err();
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json.get("error").is_some());
    }
}
