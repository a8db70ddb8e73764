use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub upstream: UpstreamConfig,
    pub media: MediaConfig,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.camera.validate()?;
        self.detection.validate()?;
        if self.upstream.timeout_secs == 0 {
            return Err("upstream timeout must be greater than zero".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// REST host that `/api/` requests are forwarded to.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upstream_base_url() -> String {
    "https://api.n2yo.com/rest/v1/satellite".into()
}

fn default_upstream_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    pub document_root: PathBuf,
    pub videos_dir: PathBuf,
    pub models_dir: PathBuf,
}

/// Where camera frames come from: a local device index or a stream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    Device(i32),
    Url(String),
}

impl CameraSource {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match value.parse::<i32>() {
            Ok(index) if index >= 0 => Some(CameraSource::Device(index)),
            _ => Some(CameraSource::Url(value.to_string())),
        }
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Device(index) => write!(f, "device {}", index),
            CameraSource::Url(url) => write!(f, "{}", url),
        }
    }
}

fn deserialize_camera_source<'de, D>(deserializer: D) -> Result<Option<CameraSource>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(CameraSource::parse))
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default, deserialize_with = "deserialize_camera_source")]
    pub source: Option<CameraSource>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_stream_fps")]
    pub fps: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
    #[serde(default = "default_watermark")]
    pub watermark: String,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_stream_fps() -> u64 {
    30
}

fn default_jpeg_quality() -> i32 {
    80
}

fn default_watermark() -> String {
    "media relay".into()
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps as f64).round() as u64
}

impl CameraConfig {
    pub fn get_stream_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.fps)
    }

    fn validate(&self) -> Result<(), String> {
        if self.fps == 0 {
            return Err("camera fps must be greater than zero".into());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(format!(
                "jpeg quality {} is out of range, expected 1..=100",
                self.jpeg_quality
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct DetectionConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_labels_path")]
    pub labels_path: PathBuf,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("custom_model/best.onnx")
}

fn default_labels_path() -> PathBuf {
    PathBuf::from("custom_model/labels.txt")
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

impl DetectionConfig {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence threshold {} is out of range, expected 0.0..=1.0",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(format!(
                "iou threshold {} is out of range, expected 0.0..=1.0",
                self.iou_threshold
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no working directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    config.validate().map_err(config::ConfigError::Message)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
server:
  host: 127.0.0.1
  port: 8080
log_level: info
upstream:
  base_url: http://upstream.local/rest
media:
  document_root: landing
  videos_dir: .
  models_dir: custom_model
camera:
  source: "0"
detection:
  confidence_threshold: 0.4
"#;

    fn parse(yaml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<Config>()
    }

    #[test]
    fn test_camera_source_parse() {
        assert_eq!(CameraSource::parse("0"), Some(CameraSource::Device(0)));
        assert_eq!(CameraSource::parse(" 2 "), Some(CameraSource::Device(2)));
        assert_eq!(
            CameraSource::parse("rtsp://cam.local/stream"),
            Some(CameraSource::Url("rtsp://cam.local/stream".into()))
        );
        assert_eq!(
            CameraSource::parse("-1"),
            Some(CameraSource::Url("-1".into()))
        );
        assert_eq!(CameraSource::parse(""), None);
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = parse(BASE).unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:8080");
        assert_eq!(config.camera.source, Some(CameraSource::Device(0)));
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.camera.jpeg_quality, 80);
        assert_eq!(config.upstream.timeout_secs, 15);
        assert_eq!(config.detection.confidence_threshold, 0.4);
        assert_eq!(
            config.detection.model_path,
            PathBuf::from("custom_model/best.onnx")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_camera_source_disables_streaming() {
        let yaml = BASE.replace("  source: \"0\"\n", "  fps: 10\n");
        let config = parse(&yaml).unwrap();

        assert_eq!(config.camera.source, None);
        assert_eq!(config.camera.get_stream_delay_ms(), 100);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let yaml = BASE.replace("confidence_threshold: 0.4", "confidence_threshold: 1.5");
        let config = parse(&yaml).unwrap();

        assert!(config.validate().is_err());
    }
}
