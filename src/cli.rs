use crate::config::{CameraSource, Config};
use clap::Parser;
use std::path::PathBuf;

/// Startup flags. Anything given here wins over the configuration files.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "media_relay",
    version,
    about = "Local relay serving static assets, video files, an API proxy and an annotated camera feed"
)]
pub struct Cli {
    /// Listening port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Camera device index or stream URL; streaming is disabled when absent
    #[arg(short, long)]
    pub camera: Option<String>,

    /// Minimum detection confidence in [0, 1]
    #[arg(long)]
    pub confidence: Option<f32>,

    /// Path to the ONNX detection model
    #[arg(short, long)]
    pub model: Option<PathBuf>,
}

impl Cli {
    pub fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(camera) = self.camera.as_deref() {
            config.camera.source = CameraSource::parse(camera);
        }
        if let Some(confidence) = self.confidence {
            config.detection.confidence_threshold = confidence;
        }
        if let Some(model) = self.model {
            config.detection.model_path = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let cli = Cli::try_parse_from([
            "media_relay",
            "--port",
            "9000",
            "--camera",
            "rtsp://cam.local/live",
            "--confidence",
            "0.5",
        ])
        .unwrap();

        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.camera.as_deref(), Some("rtsp://cam.local/live"));
        assert_eq!(cli.confidence, Some(0.5));
        assert_eq!(cli.model, None);
    }
}
