//! Terminal lines and annotated snapshots for verification decisions.

use facegate_core::gate::DenyReason;
use facegate_core::{Decision, FaceRegion};
use image::imageops;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const GRANTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;
/// Height of the filled label band along the bottom edge of the box.
const LABEL_BAND: u32 = 35;

/// One line describing a decision.
pub fn describe(decision: &Decision) -> String {
    match (decision, decision.distance()) {
        (
            Decision::Unknown {
                reason: DenyReason::NoFace,
                ..
            },
            _,
        ) => decision.message().to_string(),
        (_, Some(distance)) => format!("{} (distance {distance:.3})", decision.status()),
        (_, None) => decision.status().to_string(),
    }
}

/// Mirror `frame` and outline the compared face, green if granted, red otherwise.
///
/// Frames without a face come back mirrored but unmarked.
pub fn annotate(frame: &RgbImage, decision: &Decision) -> RgbImage {
    let mut display = imageops::flip_horizontal(frame);
    if let Some(face) = decision.face() {
        let color = if decision.is_granted() {
            GRANTED_COLOR
        } else {
            UNKNOWN_COLOR
        };
        draw_face_box(&mut display, &face.mirrored(frame.width()), color);
    }
    display
}

fn draw_face_box(image: &mut RgbImage, face: &FaceRegion, color: Rgb<u8>) {
    let x = face.x.round() as i32;
    let y = face.y.round() as i32;
    let width = face.width.round().max(1.0) as u32;
    let height = face.height.round().max(1.0) as u32;

    for inset in 0..BOX_THICKNESS {
        let w = width.saturating_sub(2 * inset as u32);
        let h = height.saturating_sub(2 * inset as u32);
        if w == 0 || h == 0 {
            break;
        }
        draw_hollow_rect_mut(image, Rect::at(x + inset, y + inset).of_size(w, h), color);
    }

    let band = LABEL_BAND.min(height);
    let band_top = y + height as i32 - band as i32;
    draw_filled_rect_mut(image, Rect::at(x, band_top).of_size(width, band), color);
}
