use crate::detection::{Detection, Detector};
use opencv::{
    core::{Mat, Point, Rect, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for AnnotationError {
    fn from(err: opencv::Error) -> Self {
        AnnotationError::OpenCvError(err)
    }
}

/// BGR colors cycled by class id.
pub const PALETTE: [(f64, f64, f64); 6] = [
    (0.0, 255.0, 0.0),
    (255.0, 0.0, 0.0),
    (0.0, 0.0, 255.0),
    (0.0, 255.0, 255.0),
    (255.0, 0.0, 255.0),
    (255.0, 255.0, 0.0),
];

const FONT_SCALE: f64 = 0.5;
const LABEL_PADDING: i32 = 6;

pub fn class_color(class_id: u32) -> Scalar {
    let (b, g, r) = PALETTE[class_id as usize % PALETTE.len()];
    Scalar::new(b, g, r, 0.0)
}

pub fn label_text(class_name: &str, confidence: f32) -> String {
    format!("{} {:.2}", class_name, confidence)
}

/// Overlay text that does not depend on individual detections.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStats {
    pub fps: f64,
    pub detections: usize,
}

impl FrameStats {
    pub fn lines(&self) -> [String; 2] {
        [
            format!("FPS: {:.1}", self.fps),
            format!("Detections: {}", self.detections),
        ]
    }
}

/// A captured frame being prepared for the stream.
pub struct CvFrame {
    pub mat: Mat,
}

impl CvFrame {
    pub fn new(mat: Mat) -> Self {
        Self { mat }
    }

    pub fn boxes(
        &mut self,
        detections: &[Detection],
        detector: &dyn Detector,
    ) -> Result<&mut Self, AnnotationError> {
        for detection in detections {
            let x1 = detection.x1 as i32;
            let y1 = detection.y1 as i32;
            let x2 = detection.x2 as i32;
            let y2 = detection.y2 as i32;
            let color = class_color(detection.class_id);
            let label = label_text(&detector.class_name(detection.class_id), detection.confidence);

            imgproc::rectangle(
                &mut self.mat,
                Rect::new(x1, y1, x2 - x1, y2 - y1),
                color,
                2,
                imgproc::LINE_8,
                0,
            )?;

            let mut baseline = 0;
            let text_size = imgproc::get_text_size(
                &label,
                imgproc::FONT_HERSHEY_SIMPLEX,
                FONT_SCALE,
                1,
                &mut baseline,
            )?;

            imgproc::rectangle(
                &mut self.mat,
                Rect::new(
                    x1,
                    y1 - text_size.height - LABEL_PADDING,
                    text_size.width,
                    text_size.height + LABEL_PADDING,
                ),
                color,
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )?;

            imgproc::put_text(
                &mut self.mat,
                &label,
                Point::new(x1, y1 - 4),
                imgproc::FONT_HERSHEY_SIMPLEX,
                FONT_SCALE,
                Scalar::new(255.0, 255.0, 255.0, 0.0),
                1,
                imgproc::LINE_AA,
                false,
            )?;
        }
        Ok(self)
    }

    pub fn stats(&mut self, stats: &FrameStats) -> Result<&mut Self, AnnotationError> {
        for (row, line) in stats.lines().iter().enumerate() {
            imgproc::put_text(
                &mut self.mat,
                line,
                Point::new(10, 25 + 25 * row as i32),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.7,
                Scalar::new(0.0, 255.0, 0.0, 0.0),
                2,
                imgproc::LINE_AA,
                false,
            )?;
        }
        Ok(self)
    }

    pub fn watermark(&mut self, text: &str) -> Result<&mut Self, AnnotationError> {
        if text.is_empty() {
            return Ok(self);
        }
        let rows = self.mat.rows();
        imgproc::put_text(
            &mut self.mat,
            text,
            Point::new(10, rows - 10),
            imgproc::FONT_HERSHEY_SIMPLEX,
            FONT_SCALE,
            Scalar::new(255.0, 255.0, 255.0, 0.0),
            1,
            imgproc::LINE_AA,
            false,
        )?;
        Ok(self)
    }

    pub fn to_jpg(&self, quality: i32) -> Result<Vec<u8>, AnnotationError> {
        let mut buf = Vector::<u8>::new();
        let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
        imgcodecs::imencode(".jpg", &self.mat, &mut buf, &params)
            .map_err(AnnotationError::EncodeFrameFailed)?;
        Ok(buf.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectorError;
    use opencv::core::CV_8UC3;

    struct NamedClasses(Vec<String>);

    impl Detector for NamedClasses {
        fn detect(&self, _: &Mat, _: f32) -> Result<Vec<Detection>, DetectorError> {
            Ok(vec![])
        }

        fn class_names(&self) -> &[String] {
            &self.0
        }
    }

    fn blank_frame() -> Mat {
        Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_palette_cycles_by_class_id() {
        assert_eq!(class_color(0), class_color(PALETTE.len() as u32));
        assert_eq!(class_color(2), class_color(2 + 3 * PALETTE.len() as u32));
        assert_ne!(class_color(0), class_color(1));
    }

    #[test]
    fn test_label_text() {
        assert_eq!(label_text("satellite", 0.876), "satellite 0.88");
    }

    #[test]
    fn test_stats_lines() {
        let stats = FrameStats {
            fps: 14.96,
            detections: 3,
        };

        assert_eq!(stats.lines(), ["FPS: 15.0".to_string(), "Detections: 3".to_string()]);
    }

    #[test]
    fn test_annotate_and_encode() {
        let detector = NamedClasses(vec!["drone".into()]);
        let detections = [Detection {
            class_id: 7,
            confidence: 0.9,
            x1: 20.0,
            y1: 30.0,
            x2: 80.0,
            y2: 90.0,
        }];
        let mut frame = CvFrame::new(blank_frame());

        frame
            .boxes(&detections, &detector)
            .unwrap()
            .stats(&FrameStats {
                fps: 30.0,
                detections: 1,
            })
            .unwrap()
            .watermark("relay")
            .unwrap();

        let jpeg = frame.to_jpg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(detector.class_name(7), "class 7");
    }
}
