use crate::error::DetectorError;
use crate::frame::{BoundingBox, RawFrame};

/// Detection capability: inspects one frame and reports the regions found
pub trait Detector: Send {
    /// Boxes found in `frame`, in a stable order; empty when nothing was found
    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Loads a fresh detector for each analysed session
pub trait DetectorFactory: Send + Sync {
    /// Load models or assets. Failure disables analysis for that session only.
    fn load(&self) -> Result<Box<dyn Detector>, DetectorError>;
}
