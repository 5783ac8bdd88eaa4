use crate::frame::{BoundingBox, RawFrame};
use image::{ImageBuffer, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::{trace, warn};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;

/// Draw every box onto a packed 3-channel frame in place.
///
/// Boxes are clipped to the frame; empty boxes and frames of other channel
/// depths are left untouched.
pub fn draw_boxes(frame: &mut RawFrame, boxes: &[BoundingBox]) {
    if boxes.is_empty() || frame.geometry.channels != 3 {
        return;
    }

    let width = frame.geometry.width;
    let height = frame.geometry.height;
    if frame.data.len() != frame.geometry.frame_size() {
        warn!(
            "Frame {} holds {} bytes, expected {}; not annotating",
            frame.sequence,
            frame.data.len(),
            frame.geometry.frame_size()
        );
        return;
    }

    let data = std::mem::take(&mut frame.data);
    let mut canvas: ImageBuffer<Rgb<u8>, Vec<u8>> = match ImageBuffer::from_raw(width, height, data)
    {
        Some(canvas) => canvas,
        None => return,
    };

    for b in boxes.iter().filter(|b| b.w > 0 && b.h > 0) {
        for inset in 0..BOX_THICKNESS {
            let w = b.w - 2 * inset;
            let h = b.h - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(b.x + inset, b.y + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        }
    }

    trace!("Drew {} box(es) on frame {}", boxes.len(), frame.sequence);
    frame.data = canvas.into_raw();
}
