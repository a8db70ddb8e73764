use crate::range::{parse_range, RangeError};
use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

#[derive(Error, Debug)]
pub enum FileServeError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Invalid range: {0}")]
    Range(#[from] RangeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Http builder error: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for FileServeError {
    fn into_response(self) -> Response {
        match self {
            FileServeError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            FileServeError::Range(RangeError::Malformed(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            FileServeError::Range(RangeError::Unsatisfiable { file_size, .. }) => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", file_size))],
                self.to_string(),
            )
                .into_response(),
            FileServeError::Io(_) | FileServeError::HttpBuilder(_) => {
                tracing::error!("Failed to serve file: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}

/// How a resolved file is handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Inline,
    Attachment,
}

/// Directory that files may be served from, looked up by bare filename.
#[derive(Debug, Clone)]
pub struct AllowedDir {
    base: PathBuf,
    extension: Option<&'static str>,
    content_type: &'static str,
    delivery: Delivery,
}

impl AllowedDir {
    pub fn new(base: impl Into<PathBuf>, content_type: &'static str, delivery: Delivery) -> Self {
        Self {
            base: base.into(),
            extension: None,
            content_type,
            delivery,
        }
    }

    pub fn with_extension(mut self, extension: &'static str) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Resolves the last path component of `requested` inside the base
    /// directory. Directory parts of the request are discarded.
    pub fn resolve(&self, requested: &str) -> Result<(PathBuf, String), FileServeError> {
        let not_found = || FileServeError::NotFound(requested.to_string());

        let name = Path::new(requested)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(not_found)?;

        if let Some(extension) = self.extension {
            let matches = Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
            if !matches {
                return Err(not_found());
            }
        }

        let path = self.base.join(name);
        if !path.is_file() {
            return Err(not_found());
        }

        Ok((path, name.to_string()))
    }

    pub async fn serve(
        &self,
        requested: &str,
        headers: &HeaderMap,
    ) -> Result<Response, FileServeError> {
        let (path, name) = self.resolve(requested)?;
        let mut file = File::open(&path).await?;
        let file_size = file.metadata().await?.len();

        let range = match headers
            .get(header::RANGE)
            .and_then(|value| value.to_str().ok())
        {
            Some(value) => parse_range(value, file_size)?,
            None => None,
        };

        let mut builder = Response::builder()
            .header(header::CONTENT_TYPE, self.content_type)
            .header(header::ACCEPT_RANGES, "bytes");

        if self.delivery == Delivery::Attachment {
            builder = builder.header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            );
        }

        let body = match range {
            Some(range) => {
                tracing::debug!(
                    file = %name,
                    start = range.start,
                    end = range.end,
                    file_size,
                    "Serving byte range"
                );
                file.seek(SeekFrom::Start(range.start)).await?;
                builder = builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_RANGE, range.content_range(file_size))
                    .header(header::CONTENT_LENGTH, range.len());
                Body::from_stream(ReaderStream::new(file.take(range.len())))
            }
            None => {
                builder = builder
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, file_size);
                Body::from_stream(ReaderStream::new(file))
            }
        };

        builder
            .body(body)
            .map_err(|e| FileServeError::HttpBuilder(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::HeaderValue;
    use std::io::Write;

    fn fixture(dir: &tempfile::TempDir, name: &str, len: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
        file.write_all(&data).unwrap();
        data
    }

    fn videos(dir: &tempfile::TempDir) -> AllowedDir {
        AllowedDir::new(dir.path(), "video/mp4", Delivery::Inline).with_extension("mp4")
    }

    #[test]
    fn test_resolve_uses_filename_only() {
        let dir = tempfile::tempdir().unwrap();
        fixture(&dir, "clip.mp4", 10);
        let videos = videos(&dir);

        let (path, name) = videos.resolve("../../somewhere/clip.mp4").unwrap();
        assert_eq!(path, dir.path().join("clip.mp4"));
        assert_eq!(name, "clip.mp4");

        assert!(matches!(
            videos.resolve(".."),
            Err(FileServeError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        fixture(&dir, "notes.txt", 10);

        assert!(matches!(
            videos(&dir).resolve("notes.txt"),
            Err(FileServeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_full_file_without_range() {
        let dir = tempfile::tempdir().unwrap();
        let data = fixture(&dir, "clip.mp4", 1000);

        let response = videos(&dir).serve("clip.mp4", &HeaderMap::new()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_every_valid_range_returns_exact_slice() {
        let dir = tempfile::tempdir().unwrap();
        let data = fixture(&dir, "clip.mp4", 64);
        let videos = videos(&dir);

        for (start, end) in [(0u64, 0u64), (0, 63), (10, 20), (63, 63), (5, 200)] {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::RANGE,
                HeaderValue::from_str(&format!("bytes={}-{}", start, end)).unwrap(),
            );
            let response = videos.serve("clip.mp4", &headers).await.unwrap();
            let end = end.min(63);

            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            assert_eq!(
                response.headers()[header::CONTENT_RANGE],
                format!("bytes {}-{}/64", start, end).as_str()
            );
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(body.as_ref(), &data[start as usize..=end as usize]);
        }
    }

    #[tokio::test]
    async fn test_attachment_headers() {
        let dir = tempfile::tempdir().unwrap();
        fixture(&dir, "best.pt", 16);
        let models = AllowedDir::new(dir.path(), "application/octet-stream", Delivery::Attachment);

        let response = models.serve("best.pt", &HeaderMap::new()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"best.pt\""
        );
    }

    #[tokio::test]
    async fn test_range_errors_map_to_status() {
        let dir = tempfile::tempdir().unwrap();
        fixture(&dir, "clip.mp4", 100);
        let videos = videos(&dir);

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=x-y"));
        let err = videos.serve("clip.mp4", &headers).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=500-"));
        let err = videos.serve("clip.mp4", &headers).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */100");
    }
}
