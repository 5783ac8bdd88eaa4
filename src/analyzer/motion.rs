use super::detector::{Detector, DetectorFactory};
use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::frame::{BoundingBox, FrameGeometry, RawFrame};

use image::{GrayImage, Luma};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::{dilate, erode},
    region_labelling::{connected_components, Connectivity},
};
use std::collections::BTreeMap;
use tracing::{debug, info};

const BACKGROUND_LEARNING_RATE: f32 = 0.05;
const MORPHOLOGY_KERNEL: u8 = 3;
const BLUR_SIGMA: f32 = 2.0;

/// Frame-differencing detector: one box per changed region above a minimum area
pub struct MotionDetector {
    geometry: FrameGeometry,
    delta_threshold: u8,
    min_region_area: u32,
    mask: Option<GrayImage>,
    background_model: Option<GrayImage>,
    frame_count: u64,
}

impl MotionDetector {
    pub fn new(
        geometry: FrameGeometry,
        delta_threshold: u8,
        min_region_area: u32,
        mask: Option<GrayImage>,
    ) -> Self {
        Self {
            geometry,
            delta_threshold,
            min_region_area,
            mask,
            background_model: None,
            frame_count: 0,
        }
    }

    pub fn background_initialized(&self) -> bool {
        self.background_model.is_some()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_count
    }

    /// Convert packed BGR (or gray) bytes to a luma image
    fn frame_to_gray(&self, frame: &RawFrame) -> Result<GrayImage, DetectorError> {
        let expected = self.geometry.frame_size();
        if frame.geometry != self.geometry || frame.data.len() != expected {
            return Err(DetectorError::Detection {
                details: format!(
                    "frame is {}x{}x{} ({} bytes), detector expects {}x{}x{}",
                    frame.geometry.width,
                    frame.geometry.height,
                    frame.geometry.channels,
                    frame.data.len(),
                    self.geometry.width,
                    self.geometry.height,
                    self.geometry.channels
                ),
            });
        }

        let channels = self.geometry.channels as usize;
        let mut gray = GrayImage::new(self.geometry.width, self.geometry.height);
        for (pixel, bgr) in gray.pixels_mut().zip(frame.data.chunks_exact(channels)) {
            let value = if channels >= 3 {
                0.114 * bgr[0] as f32 + 0.587 * bgr[1] as f32 + 0.299 * bgr[2] as f32
            } else {
                bgr[0] as f32
            };
            *pixel = Luma([value as u8]);
        }

        Ok(gray)
    }

    fn frame_difference(&self, background: &GrayImage, current: &GrayImage) -> GrayImage {
        let (width, height) = background.dimensions();
        let mut diff = GrayImage::new(width, height);

        for (x, y, bg_pixel) in background.enumerate_pixels() {
            let masked_out = self
                .mask
                .as_ref()
                .map(|mask| mask.get_pixel(x, y)[0] == 0)
                .unwrap_or(false);
            if masked_out {
                continue;
            }
            let curr = current.get_pixel(x, y)[0];
            let delta = (bg_pixel[0] as i16 - curr as i16).unsigned_abs() as u8;
            diff.put_pixel(x, y, Luma([delta]));
        }

        diff
    }

    fn update_background_model(&mut self, current: &GrayImage) {
        if let Some(ref mut background) = self.background_model {
            for (bg_pixel, curr_pixel) in background.pixels_mut().zip(current.pixels()) {
                let bg = bg_pixel[0] as f32;
                let curr = curr_pixel[0] as f32;
                bg_pixel[0] =
                    (bg * (1.0 - BACKGROUND_LEARNING_RATE) + curr * BACKGROUND_LEARNING_RATE) as u8;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u32,
}

impl Detector for MotionDetector {
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<BoundingBox>, DetectorError> {
        let gray = self.frame_to_gray(frame)?;
        let blurred = gaussian_blur_f32(&gray, BLUR_SIGMA);

        let background = match self.background_model.as_ref() {
            Some(background) => background,
            None => {
                debug!("Initializing background model with frame {}", frame.sequence);
                self.background_model = Some(blurred);
                self.frame_count = 1;
                return Ok(Vec::new());
            }
        };

        let diff = self.frame_difference(background, &blurred);
        let binary = threshold(&diff, self.delta_threshold);
        let cleaned = dilate(
            &erode(&binary, Norm::LInf, MORPHOLOGY_KERNEL),
            Norm::LInf,
            MORPHOLOGY_KERNEL,
        );
        let components = connected_components(&cleaned, Connectivity::Eight, Luma([0u8]));

        // Labels are assigned in scan order, so the map keeps boxes top-to-bottom
        let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
        for (x, y, label) in components.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            regions
                .entry(label)
                .and_modify(|r| {
                    r.min_x = r.min_x.min(x);
                    r.min_y = r.min_y.min(y);
                    r.max_x = r.max_x.max(x);
                    r.max_y = r.max_y.max(y);
                    r.pixels += 1;
                })
                .or_insert(Region {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                    pixels: 1,
                });
        }

        let boxes: Vec<BoundingBox> = regions
            .values()
            .filter(|r| r.pixels >= self.min_region_area)
            .map(|r| {
                BoundingBox::new(
                    r.min_x as i32,
                    r.min_y as i32,
                    (r.max_x - r.min_x + 1) as i32,
                    (r.max_y - r.min_y + 1) as i32,
                )
            })
            .collect();

        self.update_background_model(&blurred);
        self.frame_count += 1;

        if !boxes.is_empty() {
            debug!(
                "Motion in frame {}: {} region(s) of {} candidate(s)",
                frame.sequence,
                boxes.len(),
                regions.len()
            );
        }
        Ok(boxes)
    }
}

/// Builds a [`MotionDetector`] per session, loading the optional mask asset
pub struct MotionDetectorFactory {
    config: AnalysisConfig,
}

impl MotionDetectorFactory {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    fn load_mask(&self, path: &str) -> Result<GrayImage, DetectorError> {
        let mask = image::open(path)
            .map_err(|e| DetectorError::Unavailable {
                details: format!("failed to load mask '{}': {}", path, e),
            })?
            .to_luma8();

        let geometry = self.config.geometry();
        if mask.dimensions() != (geometry.width, geometry.height) {
            return Err(DetectorError::Unavailable {
                details: format!(
                    "mask '{}' is {}x{}, frames are {}x{}",
                    path,
                    mask.width(),
                    mask.height(),
                    geometry.width,
                    geometry.height
                ),
            });
        }

        Ok(mask)
    }
}

impl DetectorFactory for MotionDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError> {
        let mask = match self.config.mask_path.as_deref() {
            Some(path) => Some(self.load_mask(path)?),
            None => None,
        };

        info!(
            "Loaded motion detector ({}x{}, threshold {}, min area {}, mask: {})",
            self.config.width,
            self.config.height,
            self.config.delta_threshold,
            self.config.min_region_area,
            mask.is_some()
        );

        Ok(Box::new(MotionDetector::new(
            self.config.geometry(),
            self.config.delta_threshold,
            self.config.min_region_area,
            mask,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;

    const W: u32 = 64;
    const H: u32 = 48;

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(W, H, 3)
    }

    fn frame_with_square(sequence: u64, square: Option<(u32, u32, u32)>) -> RawFrame {
        let mut data = vec![0u8; geometry().frame_size()];
        if let Some((sx, sy, size)) = square {
            for y in sy..sy + size {
                for x in sx..sx + size {
                    let idx = ((y * W + x) * 3) as usize;
                    data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
                }
            }
        }
        RawFrame::from_bytes(sequence, geometry(), data).unwrap()
    }

    fn analysis_config() -> AnalysisConfig {
        let mut config = WorkerConfig::default().analysis;
        config.width = W;
        config.height = H;
        config.min_region_area = 100;
        config
    }

    #[test]
    fn test_first_frame_initializes_background() {
        let mut detector = MotionDetector::new(geometry(), 25, 100, None);
        let boxes = detector.detect(&frame_with_square(0, None)).unwrap();
        assert!(boxes.is_empty());
        assert!(detector.background_initialized());
        assert_eq!(detector.frames_processed(), 1);
    }

    #[test]
    fn test_static_scene_yields_no_boxes() {
        let mut detector = MotionDetector::new(geometry(), 25, 100, None);
        detector.detect(&frame_with_square(0, None)).unwrap();
        assert!(detector.detect(&frame_with_square(1, None)).unwrap().is_empty());
    }

    #[test]
    fn test_new_object_is_boxed() {
        let mut detector = MotionDetector::new(geometry(), 25, 100, None);
        detector.detect(&frame_with_square(0, None)).unwrap();

        let boxes = detector
            .detect(&frame_with_square(1, Some((20, 10, 20))))
            .unwrap();
        assert_eq!(boxes.len(), 1);

        let b = boxes[0];
        assert!(b.x <= 20 && b.x + b.w >= 40, "unexpected box {:?}", b);
        assert!(b.y <= 10 && b.y + b.h >= 30, "unexpected box {:?}", b);
    }

    #[test]
    fn test_mask_suppresses_region() {
        let mask = GrayImage::from_pixel(W, H, Luma([0u8]));
        let mut detector = MotionDetector::new(geometry(), 25, 100, Some(mask));
        detector.detect(&frame_with_square(0, None)).unwrap();
        assert!(detector
            .detect(&frame_with_square(1, Some((20, 10, 20))))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_wrong_geometry_is_an_error() {
        let mut detector = MotionDetector::new(geometry(), 25, 100, None);
        let other = RawFrame::from_bytes(0, FrameGeometry::new(4, 2, 3), vec![0u8; 24]).unwrap();
        assert!(matches!(
            detector.detect(&other),
            Err(DetectorError::Detection { .. })
        ));
    }

    #[test]
    fn test_factory_without_mask_loads() {
        let factory = MotionDetectorFactory::new(analysis_config());
        assert!(factory.load().is_ok());
    }

    #[test]
    fn test_factory_missing_mask_is_unavailable() {
        let mut config = analysis_config();
        config.mask_path = Some("/nonexistent/mask.png".to_string());
        let factory = MotionDetectorFactory::new(config);
        assert!(matches!(
            factory.load(),
            Err(DetectorError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_factory_mask_size_mismatch_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        GrayImage::from_pixel(10, 10, Luma([255u8])).save(&path).unwrap();

        let mut config = analysis_config();
        config.mask_path = Some(path.to_string_lossy().into_owned());
        assert!(MotionDetectorFactory::new(config).load().is_err());
    }

    #[test]
    fn test_factory_with_matching_mask_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        GrayImage::from_pixel(W, H, Luma([255u8])).save(&path).unwrap();

        let mut config = analysis_config();
        config.mask_path = Some(path.to_string_lossy().into_owned());
        assert!(MotionDetectorFactory::new(config).load().is_ok());
    }
}
