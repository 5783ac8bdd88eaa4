use crate::error::FrameError;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Fixed resolution and color depth of the raw analysis stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes per pixel (3 for BGR24)
    pub channels: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Exact byte length of every frame with this geometry
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// `WxH` as used by ffmpeg's `-s` argument
    pub fn size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

/// One uncompressed BGR frame read from the analysis-decode stream
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Sequence number within the session, starting at 0
    pub sequence: u64,
    /// Time the frame was read off the pipe
    pub timestamp: SystemTime,
    pub geometry: FrameGeometry,
    /// Packed BGR pixel data, always `geometry.frame_size()` bytes
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Wrap an existing buffer, rejecting anything that is not exactly one frame
    pub fn from_bytes(
        sequence: u64,
        geometry: FrameGeometry,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = geometry.frame_size();
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            sequence,
            timestamp: SystemTime::now(),
            geometry,
            data,
        })
    }

    /// Convert the packed BGR buffer into an RGB image
    pub fn to_rgb_image(&self) -> RgbImage {
        let channels = self.geometry.channels.max(1) as usize;
        let mut img = RgbImage::new(self.geometry.width, self.geometry.height);

        for (pixel, chunk) in img.pixels_mut().zip(self.data.chunks_exact(channels)) {
            *pixel = match channels {
                1 | 2 => image::Rgb([chunk[0], chunk[0], chunk[0]]),
                _ => image::Rgb([chunk[2], chunk[1], chunk[0]]),
            };
        }

        img
    }

    /// Encode the frame as JPEG
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let img = self.to_rgb_image();
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(&img)?;
        Ok(buf)
    }
}

/// Reads a raw byte stream as a sequence of fixed-size frames.
///
/// Every successful read yields exactly `geometry.frame_size()` bytes. End of
/// stream on a frame boundary yields `Ok(None)`; end of stream part-way
/// through a frame is a [`FrameError::ShortRead`]. Neither case is retried.
pub struct FrameReader<R> {
    reader: R,
    geometry: FrameGeometry,
    next_sequence: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, geometry: FrameGeometry) -> Self {
        Self {
            reader,
            geometry,
            next_sequence: 0,
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Number of complete frames read so far
    pub fn frames_read(&self) -> u64 {
        self.next_sequence
    }

    pub async fn read_frame(&mut self) -> Result<Option<RawFrame>, FrameError> {
        let expected = self.geometry.frame_size();
        let mut buf = vec![0u8; expected];
        let mut filled = 0;

        while filled < expected {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    trace!("Frame stream ended on frame boundary");
                    return Ok(None);
                }
                return Err(FrameError::ShortRead {
                    expected,
                    actual: filled,
                });
            }
            filled += n;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Ok(Some(RawFrame {
            sequence,
            timestamp: SystemTime::now(),
            geometry: self.geometry,
            data: buf,
        }))
    }
}

/// Writes whole frames to the analysis-encode stream
pub struct FrameWriter<W> {
    writer: W,
    geometry: FrameGeometry,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, geometry: FrameGeometry) -> Self {
        Self { writer, geometry }
    }

    pub async fn write_frame(&mut self, frame: &RawFrame) -> Result<(), FrameError> {
        let expected = self.geometry.frame_size();
        if frame.data.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: frame.data.len(),
            });
        }

        self.writer.write_all(&frame.data).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
