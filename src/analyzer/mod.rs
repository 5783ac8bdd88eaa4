mod detector;
mod motion;
mod overlay;
mod sampler;

pub use detector::{Detector, DetectorFactory};
pub use motion::{MotionDetector, MotionDetectorFactory};
pub use overlay::draw_boxes;
pub use sampler::{FrameSampler, SamplerEnd, SamplerReport};
