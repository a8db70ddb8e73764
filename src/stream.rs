//! Live camera session: pulls frames from an acquired device, annotates
//! them and turns them into `multipart/x-mixed-replace` parts.
//!
//! A session owns its capture and its registry guard. Whatever ends the
//! stream (client disconnect, shutdown or a processing fault) drops the
//! session, which releases the device and uncounts the session exactly once.

use crate::annotation::{AnnotationError, CvFrame, FrameStats};
use crate::camera::{CameraError, FrameSource};
use crate::detection::{Detector, DetectorError};
use crate::registry::SessionGuard;
use crate::telemetry::Metrics;
use bytes::Bytes;
use futures::stream;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{sync::broadcast, time::sleep};

pub const FRAME_BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const FRAME_RETRY_DELAY_MS: u64 = 50;

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Detection error: {0}")]
    Detection(#[from] DetectorError),
    #[error("Annotation error: {0}")]
    Annotation(#[from] AnnotationError),
}

/// Per-session knobs copied out of the startup configuration.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub confidence_threshold: f32,
    pub jpeg_quality: i32,
    pub watermark: String,
    pub frame_delay: Duration,
}

enum Pull {
    Part(Bytes),
    Retry,
}

pub struct CameraSession {
    capture: Box<dyn FrameSource>,
    detector: Option<Arc<dyn Detector>>,
    settings: StreamSettings,
    metrics: Arc<Metrics>,
    started: Instant,
    frames: u64,
    // Dropped after `capture`, so the device is released before uncounting.
    _guard: SessionGuard,
}

impl CameraSession {
    pub fn new(
        capture: Box<dyn FrameSource>,
        guard: SessionGuard,
        detector: Option<Arc<dyn Detector>>,
        settings: StreamSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            capture,
            detector,
            settings,
            metrics,
            started: Instant::now(),
            frames: 0,
            _guard: guard,
        }
    }

    fn fps(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.frames as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Pulls, annotates and encodes one frame. Blocking.
    fn next_part(&mut self) -> Result<Pull, VideoStreamError> {
        let frame = match self.capture.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Pull::Retry),
            Err(e) => {
                tracing::debug!("Transient frame failure: {}", e);
                return Ok(Pull::Retry);
            }
        };
        self.frames += 1;

        let mut image = CvFrame::new(frame);
        let mut detection_count = 0;

        if let Some(detector) = &self.detector {
            let started = Instant::now();
            let detections = detector.detect(&image.mat, self.settings.confidence_threshold)?;
            self.metrics
                .record_detection_duration(started.elapsed().as_secs_f64() * 1000.0);

            detection_count = detections.len();
            image.boxes(&detections, detector.as_ref())?;
        }

        let stats = FrameStats {
            fps: self.fps(),
            detections: detection_count,
        };
        image.stats(&stats)?.watermark(&self.settings.watermark)?;

        let jpeg = image.to_jpg(self.settings.jpeg_quality)?;
        self.metrics.record_frame(detection_count);

        Ok(Pull::Part(multipart_part(&jpeg)))
    }

    /// Turns the session into an endless body stream. The stream ends on
    /// shutdown or on a processing fault; a disconnecting client simply
    /// stops polling it and drops it.
    pub fn into_stream(
        self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> impl futures::Stream<Item = Result<Bytes, VideoStreamError>> + Send + 'static {
        stream::unfold((self, shutdown_rx), |(session, mut shutdown_rx)| async move {
            let mut session = session;
            let frame_delay = session.settings.frame_delay;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Camera session received shutdown signal");
                        return None;
                    }
                    _ = sleep(frame_delay) => {}
                }

                let pulled = tokio::task::spawn_blocking(move || {
                    let result = session.next_part();
                    (session, result)
                })
                .await;

                let (returned, result) = match pulled {
                    Ok(pulled) => pulled,
                    Err(e) => {
                        tracing::error!("Camera session worker failed: {}", e);
                        return None;
                    }
                };
                session = returned;

                match result {
                    Ok(Pull::Part(part)) => return Some((Ok(part), (session, shutdown_rx))),
                    Ok(Pull::Retry) => {
                        sleep(retry_delay()).await;
                    }
                    Err(e) => {
                        tracing::error!("Ending camera session after processing fault: {}", e);
                        return None;
                    }
                }
            }
        })
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        tracing::info!(
            frames = self.frames,
            fps = self.fps(),
            "Camera session closed"
        );
    }
}

fn retry_delay() -> Duration {
    let jitter = rand::random::<f32>() * 0.2 + 0.9;
    Duration::from_millis(FRAME_RETRY_DELAY_MS).mul_f32(jitter)
}

pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        jpeg.len()
    );
    let mut body = part_header.into_bytes();
    body.extend_from_slice(jpeg);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}
