use crate::config::{CameraConfig, CameraSource};
use opencv::{core::Mat, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera {0}")]
    Unavailable(String),
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
}

/// Capture settings requested from the device when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u64,
}

impl From<&CameraConfig> for CaptureSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }
}

/// An acquired camera. Dropping it releases the device.
pub trait FrameSource: Send {
    /// `Ok(None)` is a transient miss; the caller backs off and asks again.
    fn read_frame(&mut self) -> Result<Option<Mat>, CameraError>;
}

/// Opens a fresh, independently owned capture per call.
pub trait CameraProvider: Send + Sync + 'static {
    fn open(
        &self,
        source: &CameraSource,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameSource>, CameraError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvCameras;

impl CameraProvider for OpenCvCameras {
    fn open(
        &self,
        source: &CameraSource,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        let capture = OpenCvCapture::open(source, settings)?;
        Ok(Box::new(capture))
    }
}

pub struct OpenCvCapture {
    capture: videoio::VideoCapture,
    source: String,
}

impl OpenCvCapture {
    pub fn open(source: &CameraSource, settings: &CaptureSettings) -> Result<Self, CameraError> {
        let mut capture = match source {
            CameraSource::Device(index) => videoio::VideoCapture::new(*index, videoio::CAP_ANY),
            CameraSource::Url(url) => videoio::VideoCapture::from_file(url, videoio::CAP_ANY),
        }
        .map_err(CameraError::OpenCameraFailed)?;

        if !capture
            .is_opened()
            .map_err(CameraError::OpenCameraFailed)?
        {
            return Err(CameraError::Unavailable(source.to_string()));
        }

        // Drivers are free to ignore these; a refused setting is not fatal.
        for (property, value) in [
            (videoio::CAP_PROP_FRAME_WIDTH, settings.width as f64),
            (videoio::CAP_PROP_FRAME_HEIGHT, settings.height as f64),
            (videoio::CAP_PROP_FPS, settings.fps as f64),
        ] {
            if !capture.set(property, value).unwrap_or(false) {
                tracing::debug!("Camera {} ignored property {} = {}", source, property, value);
            }
        }

        tracing::info!("Opened camera {}", source);

        Ok(Self {
            capture,
            source: source.to_string(),
        })
    }
}

impl FrameSource for OpenCvCapture {
    fn read_frame(&mut self) -> Result<Option<Mat>, CameraError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        if grabbed && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }
}

impl Drop for OpenCvCapture {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release camera {}: {}", self.source, e);
        } else {
            tracing::debug!("Released camera {}", self.source);
        }
    }
}
