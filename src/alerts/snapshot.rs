use crate::analyzer::draw_boxes;
use crate::error::AlertError;
use crate::frame::{BoundingBox, RawFrame};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Writes JPEG snapshots named `snapshot_<camera>_<nanos>.jpg`
pub struct SnapshotStore {
    dir: PathBuf,
    url_prefix: String,
    quality: u8,
    last_nanos: AtomicU64,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            quality: quality.clamp(1, 100),
            last_nanos: AtomicU64::new(0),
        }
    }

    /// Unix nanoseconds, strictly increasing across calls on this store
    fn next_token(&self, at: SystemTime) -> u64 {
        let nanos = at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        let previous = self
            .last_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(nanos.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        nanos.max(previous + 1)
    }

    /// Annotate, encode and write the frame; returns the snapshot URL
    pub async fn write(
        &self,
        camera_id: &str,
        frame: Arc<RawFrame>,
        boxes: &[BoundingBox],
    ) -> Result<String, AlertError> {
        let file_name = format!("snapshot_{}_{}.jpg", camera_id, self.next_token(frame.timestamp));
        let path = self.dir.join(&file_name);
        let snapshot_error = |details: String| AlertError::SnapshotWrite {
            path: path.display().to_string(),
            details,
        };

        let quality = self.quality;
        let boxes = boxes.to_vec();
        let jpeg = tokio::task::spawn_blocking(move || {
            let mut annotated = (*frame).clone();
            draw_boxes(&mut annotated, &boxes);
            annotated.encode_jpeg(quality)
        })
        .await
        .map_err(|e| snapshot_error(format!("encoder task failed: {}", e)))?
        .map_err(|e| snapshot_error(format!("JPEG encoding failed: {}", e)))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| snapshot_error(e.to_string()))?;
        tokio::fs::write(&path, &jpeg)
            .await
            .map_err(|e| snapshot_error(e.to_string()))?;

        debug!(camera_id = %camera_id, "Wrote snapshot {} ({} bytes)", path.display(), jpeg.len());
        Ok(format!("{}/{}", self.url_prefix, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameGeometry;

    fn frame() -> Arc<RawFrame> {
        let geometry = FrameGeometry::new(8, 6, 3);
        Arc::new(RawFrame::from_bytes(3, geometry, vec![90u8; geometry.frame_size()]).unwrap())
    }

    #[test]
    fn test_tokens_are_strictly_increasing() {
        let store = SnapshotStore::new("/tmp", "/snapshots", 90);
        let at = SystemTime::now();
        let first = store.next_token(at);
        let second = store.next_token(at);
        let third = store.next_token(UNIX_EPOCH);
        assert!(second > first);
        assert!(third > second);
    }

    #[tokio::test]
    async fn test_write_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested"), "/snapshots/", 80);

        let url = store
            .write("cam-1", frame(), &[BoundingBox::new(1, 1, 4, 3)])
            .await
            .unwrap();

        let file_name = url.strip_prefix("/snapshots/").unwrap();
        assert!(file_name.starts_with("snapshot_cam-1_"));
        assert!(file_name.ends_with(".jpg"));

        let bytes = std::fs::read(dir.path().join("nested").join(file_name)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let store = SnapshotStore::new(blocker.join("sub"), "/snapshots", 80);
        let err = store.write("cam1", frame(), &[]).await.unwrap_err();
        assert!(matches!(err, AlertError::SnapshotWrite { .. }));
    }
}
