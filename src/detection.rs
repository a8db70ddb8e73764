use crate::config::DetectionConfig;
use ndarray::{s, Array, ArrayD, Axis, Ix4};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
    sync::Arc,
};
use thiserror::Error;

const INPUT_SIZE: i32 = 640;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to load model: {0}")]
    LoadModelFailed(#[from] ort::Error),
    #[error("Failed to load class labels: {0}")]
    LoadLabelsFailed(#[from] io::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

/// One box found in a frame, in pixel coordinates of that frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// A loaded detection model together with its ordered class-name table.
pub trait Detector: Send + Sync + 'static {
    /// Returns the detections at or above `confidence_threshold`, highest
    /// confidence first.
    fn detect(&self, frame: &Mat, confidence_threshold: f32)
        -> Result<Vec<Detection>, DetectorError>;

    fn class_names(&self) -> &[String];

    fn class_name(&self, class_id: u32) -> String {
        self.class_names()
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class {}", class_id))
    }
}

fn intersection(box1: &Detection, box2: &Detection) -> f32 {
    let width = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let height = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    width.max(0.0) * height.max(0.0)
}

fn union(box1: &Detection, box2: &Detection) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

/// Greedy non-maximum suppression. Keeps the most confident box of every
/// cluster whose overlap reaches `iou_threshold`.
pub fn non_max_suppression(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while let Some(best) = boxes.first().copied() {
        result.push(best);
        boxes = boxes
            .into_iter()
            .skip(1)
            .filter(|candidate| {
                let union = union(&best, candidate);
                union <= 0.0 || intersection(&best, candidate) / union < iou_threshold
            })
            .collect();
    }

    result
}

/// Reads one class name per line. Blank lines are skipped.
pub fn load_class_names(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut names = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let name = line.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }

    if names.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no class names in {:?}", filepath),
        ));
    }

    Ok(names)
}

fn frame_to_input(frame: &Mat) -> Result<Array<f32, Ix4>, DetectorError> {
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(INPUT_SIZE, INPUT_SIZE),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let side = INPUT_SIZE as usize;
    let bgr = resized.data_bytes()?;
    if bgr.len() != side * side * 3 {
        return Err(DetectorError::InferenceFailed(format!(
            "expected a 3 channel frame, got {} bytes",
            bgr.len()
        )));
    }

    let mut input = Array::zeros((1, 3, side, side));
    for (index, pixel) in bgr.chunks_exact(3).enumerate() {
        let y = index / side;
        let x = index % side;
        input[[0, 0, y, x]] = (pixel[2] as f32) / 255.;
        input[[0, 1, y, x]] = (pixel[1] as f32) / 255.;
        input[[0, 2, y, x]] = (pixel[0] as f32) / 255.;
    }

    Ok(input)
}

/// Decodes a YOLOv8 style `[1, 4 + classes, anchors]` output into boxes scaled
/// back to the source frame.
pub fn decode_output(
    output: &ArrayD<f32>,
    frame_width: f32,
    frame_height: f32,
    confidence_threshold: f32,
) -> Vec<Detection> {
    let transposed = output.t();
    let rows = transposed.slice(s![.., .., 0]);
    let scale = INPUT_SIZE as f32;
    let mut boxes = Vec::new();

    for row in rows.axis_iter(Axis(0)) {
        let row: Vec<_> = row.iter().copied().collect();
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob < confidence_threshold {
            continue;
        }

        let xc = row[0] / scale * frame_width;
        let yc = row[1] / scale * frame_height;
        let w = row[2] / scale * frame_width;
        let h = row[3] / scale * frame_height;

        boxes.push(Detection {
            class_id: class_id as u32,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    boxes
}

pub struct OrtDetector {
    session: Mutex<Session>,
    class_names: Vec<String>,
    iou_threshold: f32,
}

impl OrtDetector {
    pub fn new(config: &DetectionConfig) -> Result<Self, DetectorError> {
        let class_names = load_class_names(&config.labels_path)?;
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&config.model_path)?;

        tracing::info!(
            "Loaded model {:?} with {} classes",
            config.model_path,
            class_names.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            class_names,
            iou_threshold: config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectorError> {
        let mut session = self.session.lock();

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::InferenceFailed(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::InferenceFailed(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                DetectorError::InferenceFailed(format!("failed to extract tensor: {}", e))
            })?;

        let ix = shape.to_ixdyn();
        ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| DetectorError::InferenceFailed(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector for OrtDetector {
    fn detect(
        &self,
        frame: &Mat,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let input = frame_to_input(frame)?;
        let output = self.run_inference(&input)?;

        let boxes = decode_output(
            &output,
            frame.cols() as f32,
            frame.rows() as f32,
            confidence_threshold,
        );

        Ok(non_max_suppression(boxes, self.iou_threshold))
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

/// Loads the model once at startup. A missing or broken model disables
/// annotation for the lifetime of the process.
pub fn load_detector(config: &DetectionConfig) -> Option<Arc<dyn Detector>> {
    match OrtDetector::new(config) {
        Ok(detector) => Some(Arc::new(detector)),
        Err(e) => {
            tracing::warn!(
                "Detection model {:?} unavailable, streaming without annotations: {}",
                config.model_path,
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn detection(class_id: u32, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn test_non_max_suppression_keeps_best_of_overlap() {
        let boxes = vec![
            detection(0, 0.6, 10.0, 10.0, 110.0, 110.0),
            detection(0, 0.9, 12.0, 12.0, 112.0, 112.0),
            detection(1, 0.8, 300.0, 300.0, 350.0, 350.0),
        ];

        let kept = non_max_suppression(boxes, 0.7);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn test_decode_output_scales_and_filters() {
        // two classes, three anchors: [1, 6, 3]
        let mut output = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 6, 3]));
        // anchor 0: centered box, class 1 at 0.9
        output[[0, 0, 0]] = 320.0;
        output[[0, 1, 0]] = 320.0;
        output[[0, 2, 0]] = 64.0;
        output[[0, 3, 0]] = 64.0;
        output[[0, 5, 0]] = 0.9;
        // anchor 1: below threshold
        output[[0, 4, 1]] = 0.1;

        let boxes = decode_output(&output, 1280.0, 720.0, 0.25);

        assert_eq!(boxes.len(), 1);
        let found = boxes[0];
        assert_eq!(found.class_id, 1);
        assert_eq!(found.confidence, 0.9);
        assert!((found.x1 - 576.0).abs() < 1e-3);
        assert!((found.x2 - 704.0).abs() < 1e-3);
        assert!((found.y1 - 324.0).abs() < 1e-3);
        assert!((found.y2 - 396.0).abs() < 1e-3);
    }

    #[test]
    fn test_load_class_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "drone\n\n satellite \nplane").unwrap();

        let names = load_class_names(file.path()).unwrap();

        assert_eq!(names, vec!["drone", "satellite", "plane"]);
    }

    #[test]
    fn test_missing_model_is_not_loaded() {
        let config = DetectionConfig {
            model_path: "does/not/exist.onnx".into(),
            labels_path: "does/not/exist.txt".into(),
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
        };

        assert!(load_detector(&config).is_none());
    }
}
