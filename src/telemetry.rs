use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::collections::HashSet;

pub struct Metrics {
    request_counter: IntCounterVec,
    frames_streamed: IntCounter,
    detections: IntCounter,
    detection_duration: Histogram,
    active_sessions: IntGauge,
    upstream_failures: IntCounter,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests"),
            &["route"],
        )?;

        let frames_streamed = IntCounter::new(
            "frames_streamed_total",
            "Frames sent to camera stream clients",
        )?;

        let detections = IntCounter::new("detections_total", "Detections drawn on streamed frames")?;

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));
        let detection_duration = Histogram::with_opts(
            HistogramOpts::new(
                "detection_duration_ms",
                "Duration of detection operations in milliseconds",
            )
            .buckets(boundaries),
        )?;

        let active_sessions = IntGauge::new(
            "active_camera_sessions",
            "Camera stream sessions currently open",
        )?;

        let upstream_failures = IntCounter::new(
            "upstream_failures_total",
            "Proxied API calls answered with 502",
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(frames_streamed.clone()))?;
        registry.register(Box::new(detections.clone()))?;
        registry.register(Box::new(detection_duration.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(upstream_failures.clone()))?;

        Ok(Metrics {
            request_counter,
            frames_streamed,
            detections,
            detection_duration,
            active_sessions,
            upstream_failures,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        self.request_counter.with_label_values(&[route]).inc();
    }

    pub fn record_frame(&self, detections: usize) {
        self.frames_streamed.inc();
        self.detections.inc_by(detections as u64);
    }

    pub fn record_detection_duration(&self, duration_ms: f64) {
        self.detection_duration.observe(duration_ms);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.inc();
    }

    pub fn set_active_sessions(&self, active: usize) {
        self.active_sessions.set(active as i64);
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let parts = (2, 22, 26, 46, 146);
        let get = generate_boundaries(parts);
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("camera_status");
        metrics.record_frame(3);
        metrics.set_active_sessions(2);

        let text = metrics.render().unwrap();

        assert!(text.contains("requests_total{route=\"camera_status\"} 1"));
        assert!(text.contains("detections_total 3"));
        assert!(text.contains("active_camera_sessions 2"));
    }
}
