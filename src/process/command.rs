use super::handle::{ProcessRole, ProcessSpec, StdioMode};
use crate::config::MediaConfig;
use crate::frame::FrameGeometry;

/// Produces the launch specification for each pipeline role
pub trait CommandPlanner: Send + Sync {
    /// Copy `source_url` unmodified to the camera's publish endpoint
    fn ingress_relay(&self, camera_id: &str, source_url: &str) -> ProcessSpec;

    /// Decode `source_url` to raw frames of `geometry` at `fps` on stdout
    fn analysis_decode(
        &self,
        camera_id: &str,
        source_url: &str,
        geometry: FrameGeometry,
        fps: u32,
    ) -> ProcessSpec;

    /// Encode raw frames read from stdin and publish them
    fn analysis_encode(&self, camera_id: &str, geometry: FrameGeometry, fps: u32) -> ProcessSpec;
}

/// ffmpeg command lines for the three pipeline roles
#[derive(Debug, Clone)]
pub struct FfmpegPlanner {
    config: MediaConfig,
}

impl FfmpegPlanner {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Publish endpoint for the relayed stream of a camera
    pub fn publish_url(&self, camera_id: &str) -> String {
        format!(
            "{}/{}",
            self.config.publish_base_url.trim_end_matches('/'),
            camera_id
        )
    }

    /// Publish endpoint for the annotated analysis stream of a camera
    pub fn annotated_url(&self, camera_id: &str) -> String {
        format!("{}{}", self.publish_url(camera_id), self.config.annotated_suffix)
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.config.log_level.clone(),
        ]
    }
}

impl CommandPlanner for FfmpegPlanner {
    fn ingress_relay(&self, camera_id: &str, source_url: &str) -> ProcessSpec {
        let mut args = self.base_args();
        args.extend([
            "-rtsp_transport".to_string(),
            self.config.rtsp_transport.clone(),
            "-i".to_string(),
            source_url.to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-an".to_string(),
            "-f".to_string(),
            "rtsp".to_string(),
            "-rtsp_transport".to_string(),
            self.config.rtsp_transport.clone(),
            self.publish_url(camera_id),
        ]);

        ProcessSpec::new(ProcessRole::IngressRelay, &self.config.ffmpeg_path, args)
    }

    fn analysis_decode(
        &self,
        _camera_id: &str,
        source_url: &str,
        geometry: FrameGeometry,
        fps: u32,
    ) -> ProcessSpec {
        let mut args = self.base_args();
        args.extend([
            "-rtsp_transport".to_string(),
            self.config.rtsp_transport.clone(),
            "-i".to_string(),
            source_url.to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            pix_fmt(geometry).to_string(),
            "-s".to_string(),
            geometry.size_arg(),
            "-r".to_string(),
            fps.to_string(),
            "pipe:1".to_string(),
        ]);

        ProcessSpec::new(ProcessRole::AnalysisDecode, &self.config.ffmpeg_path, args)
            .stdout(StdioMode::Piped)
    }

    fn analysis_encode(&self, camera_id: &str, geometry: FrameGeometry, fps: u32) -> ProcessSpec {
        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            pix_fmt(geometry).to_string(),
            "-s".to_string(),
            geometry.size_arg(),
            "-r".to_string(),
            fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-an".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-tune".to_string(),
            "zerolatency".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-f".to_string(),
            "rtsp".to_string(),
            "-rtsp_transport".to_string(),
            self.config.rtsp_transport.clone(),
            self.annotated_url(camera_id),
        ]);

        ProcessSpec::new(ProcessRole::AnalysisEncode, &self.config.ffmpeg_path, args)
            .stdin(StdioMode::Piped)
    }
}

/// ffmpeg pixel format matching the configured channel depth
fn pix_fmt(geometry: FrameGeometry) -> &'static str {
    match geometry.channels {
        1 => "gray",
        4 => "bgra",
        _ => "bgr24",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;

    fn planner() -> FfmpegPlanner {
        FfmpegPlanner::new(WorkerConfig::default().media)
    }

    fn contains_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_ingress_relay_copies_to_publish_endpoint() {
        let spec = planner().ingress_relay("cam1", "rtsp://camera.local/stream");

        assert_eq!(spec.role, ProcessRole::IngressRelay);
        assert_eq!(spec.program, "ffmpeg");
        assert!(contains_pair(&spec.args, "-i", "rtsp://camera.local/stream"));
        assert!(contains_pair(&spec.args, "-c:v", "copy"));
        assert!(spec.args.contains(&"-an".to_string()));
        assert_eq!(
            spec.args.last().map(String::as_str),
            Some("rtsp://skylark-mediamtx:8554/cam1")
        );
        assert_eq!(spec.stdout, StdioMode::Null);
    }

    #[test]
    fn test_analysis_decode_emits_raw_frames() {
        let spec = planner().analysis_decode(
            "cam1",
            "rtsp://camera.local/stream",
            FrameGeometry::new(640, 480, 3),
            2,
        );

        assert!(contains_pair(&spec.args, "-f", "rawvideo"));
        assert!(contains_pair(&spec.args, "-pix_fmt", "bgr24"));
        assert!(contains_pair(&spec.args, "-s", "640x480"));
        assert!(contains_pair(&spec.args, "-r", "2"));
        assert_eq!(spec.args.last().map(String::as_str), Some("pipe:1"));
        assert_eq!(spec.stdout, StdioMode::Piped);
    }

    #[test]
    fn test_analysis_encode_reads_stdin() {
        let spec = planner().analysis_encode("cam1", FrameGeometry::new(320, 240, 3), 2);

        assert!(contains_pair(&spec.args, "-i", "-"));
        assert!(contains_pair(&spec.args, "-s", "320x240"));
        assert_eq!(spec.stdin, StdioMode::Piped);
        assert_eq!(
            spec.args.last().map(String::as_str),
            Some("rtsp://skylark-mediamtx:8554/cam1_annotated")
        );
    }

    #[test]
    fn test_publish_url_trims_trailing_slash() {
        let mut media = WorkerConfig::default().media;
        media.publish_base_url = "rtsp://relay:8554/".to_string();
        let planner = FfmpegPlanner::new(media);
        assert_eq!(planner.publish_url("front-door"), "rtsp://relay:8554/front-door");
    }
}
