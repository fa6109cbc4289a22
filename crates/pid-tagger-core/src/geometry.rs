//! Coordinate transform from PDF text runs to display-space boxes.
//!
//! Every consumer that needs a text run's position calls [`text_run_bbox`];
//! no other module re-derives per-rotation math.
//!
//! # Algorithm
//!
//! 1. Take the run's rotation angle as `atan2(b, a)` of its affine matrix.
//! 2. Build four local corners: `width` along the baseline, `height` of
//!    ascent above it and a descent of `0.2 × height` below it.
//! 3. Rotate the corners by the angle, translate by `(e, f)` and subtract
//!    the viewBox origin.
//! 4. Take the axis-aligned min/max as the PDF-space (y-up) box.
//! 5. Remap into top-left-origin display space by page rotation:
//!
//! | rotation | x′                   | y′                   |
//! |----------|----------------------|----------------------|
//! | 0°       | `x`                  | `viewport.height − y`|
//! | 90°      | `y`                  | `x`                  |
//! | 180°     | `viewport.width − x` | `y`                  |
//! | 270°     | `viewBox.height − y` | `viewBox.width − x`  |
//!
//! With no viewport the PDF-space box is returned unflipped.

use crate::models::BoundingBox;
use crate::page::{TextRun, Viewport};

/// Descent below the baseline as a fraction of the glyph height.
const DESCENT_RATIO: f64 = 0.2;

/// Reduce a rotation in degrees to one of 0, 90, 180 or 270.
///
/// Values that are not a multiple of 90 are treated as unrotated.
pub fn normalize_rotation(rotation: i32) -> i32 {
    match rotation.rem_euclid(360) {
        r @ (0 | 90 | 180 | 270) => r,
        _ => 0,
    }
}

/// Compute the display-space bounding box of a text run.
///
/// Returns `None` when the transform produces non-finite coordinates, so
/// callers can drop the run instead of propagating NaN into comparisons.
pub fn text_run_bbox(run: &TextRun, viewport: Option<&Viewport>) -> Option<BoundingBox> {
    let pdf = pdf_space_bbox(run, viewport)?;
    let bbox = match viewport {
        Some(vp) => to_display(&pdf, vp),
        None => pdf,
    };
    bbox.is_finite().then_some(bbox)
}

fn pdf_space_bbox(run: &TextRun, viewport: Option<&Viewport>) -> Option<BoundingBox> {
    let [a, b, _, _, e, f] = run.transform;
    let (sin, cos) = b.atan2(a).sin_cos();
    let descent = DESCENT_RATIO * run.height;
    let (ox, oy) = viewport
        .map(|vp| (vp.view_box[0], vp.view_box[1]))
        .unwrap_or((0.0, 0.0));

    let local = [
        (0.0, -descent),
        (run.width, -descent),
        (run.width, run.height),
        (0.0, run.height),
    ];
    let corners: Vec<(f64, f64)> = local
        .iter()
        .map(|&(lx, ly)| (e + lx * cos - ly * sin - ox, f + lx * sin + ly * cos - oy))
        .collect();
    if corners.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return None;
    }

    BoundingBox::from_points(&corners)
}

fn to_display(pdf: &BoundingBox, vp: &Viewport) -> BoundingBox {
    match normalize_rotation(vp.rotation) {
        90 => BoundingBox::new(pdf.y1, pdf.x1, pdf.y2, pdf.x2),
        180 => BoundingBox::new(vp.width - pdf.x2, pdf.y1, vp.width - pdf.x1, pdf.y2),
        // Uses viewBox extents rather than the viewport; the two only differ
        // when the viewport is scaled or the viewBox origin is offset.
        270 => {
            let w = vp.view_box_width();
            let h = vp.view_box_height();
            BoundingBox::new(h - pdf.y2, w - pdf.x2, h - pdf.y1, w - pdf.x1)
        }
        _ => BoundingBox::new(pdf.x1, vp.height - pdf.y2, pdf.x2, vp.height - pdf.y1),
    }
}

/// Displayed page size `(width, height)`.
pub fn display_size(viewport: &Viewport) -> (f64, f64) {
    (viewport.width, viewport.height)
}

/// The visual bottom-right corner of a page, used to rank drawing-number
/// candidates (title blocks sit there on P&IDs).
///
/// Display coordinates already account for page rotation, so with a
/// viewport this is simply the displayed page size. Without one, boxes are
/// in y-up PDF space and the corner is taken from the content extent.
pub fn reference_corner(viewport: Option<&Viewport>, extent: &BoundingBox) -> (f64, f64) {
    match viewport {
        Some(vp) => display_size(vp),
        None => (extent.x2, extent.y1),
    }
}
