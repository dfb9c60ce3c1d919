// Coordinate conversion between window space and overlay render space.
//
// Window frames arrive in global coordinates with the origin at the top-left
// of the primary display (the accessibility convention). Each overlay draws
// in its own display-local space with the origin at the lower-left corner.
//
// Holes are snapped outward to device pixels: a cutout may be a fraction of a
// point wider than the window it spares, never narrower.

use kurbo::{Point, Rect, Size};

use crate::display::DisplayDescriptor;

/// Edge tolerance used when deciding whether a window covers a whole display.
pub const FULL_SCREEN_TOLERANCE: f64 = 1.0;

/// Relative slack allowed before a scaled coordinate counts as off-grid.
const PIXEL_EPSILON: f64 = 1e-6;

/// True when every edge of `rect` is a finite number.
pub fn is_finite_rect(rect: Rect) -> bool {
    rect.x0.is_finite() && rect.y0.is_finite() && rect.x1.is_finite() && rect.y1.is_finite()
}

/// Map a global window frame into `display`'s local render space.
///
/// Returns `None` when the display geometry is unusable (non-finite or
/// empty), when the window does not overlap the display, or when the
/// overlap degenerates to zero area.
pub fn to_local_hole(window_frame: Rect, display: &DisplayDescriptor) -> Option<Rect> {
    let frame = display.frame;
    if !is_finite_rect(frame) || !is_finite_rect(window_frame) {
        return None;
    }

    let bounds = display.local_bounds();
    if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
        return None;
    }

    // Translate into display space, then flip the vertical axis.
    let x = window_frame.x0 - frame.x0;
    let top = window_frame.y0 - frame.y0;
    let height = window_frame.height();
    let y = bounds.height() - top - height;
    let local = Rect::from_origin_size(Point::new(x, y), Size::new(window_frame.width(), height));

    let clipped = local.intersect(bounds);
    if is_degenerate(clipped) {
        return None;
    }

    // Outward snapping can step past a display edge that is not itself on the
    // pixel grid, so clamp once more.
    let aligned = pixel_align(clipped, display.scale).intersect(bounds);
    if is_degenerate(aligned) {
        return None;
    }
    Some(aligned)
}

/// Snap `rect` outward to the device-pixel grid of a display with the given
/// backing `scale`. Idempotent: aligning an aligned rect returns it unchanged.
pub fn pixel_align(rect: Rect, scale: f64) -> Rect {
    let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
    Rect::new(
        snap(rect.x0, scale, f64::floor),
        snap(rect.y0, scale, f64::floor),
        snap(rect.x1, scale, f64::ceil),
        snap(rect.y1, scale, f64::ceil),
    )
}

fn snap(value: f64, scale: f64, direction: fn(f64) -> f64) -> f64 {
    let scaled = value * scale;
    let nearest = scaled.round();
    // Values already on the grid (up to rounding noise) stay put.
    if (scaled - nearest).abs() <= PIXEL_EPSILON * nearest.abs().max(1.0) {
        return nearest / scale;
    }
    direction(scaled) / scale
}

/// True when all four edges of `a` lie within `tolerance` of `b`'s.
pub fn frames_match(a: Rect, b: Rect, tolerance: f64) -> bool {
    (a.x0 - b.x0).abs() <= tolerance
        && (a.y0 - b.y0).abs() <= tolerance
        && (a.x1 - b.x1).abs() <= tolerance
        && (a.y1 - b.y1).abs() <= tolerance
}

/// Pick the display that shows the largest part of `frame`.
///
/// Displays with non-finite geometry are ignored. Ties go to the display
/// enumerated first.
pub fn display_for_frame(frame: Rect, displays: &[DisplayDescriptor]) -> Option<&DisplayDescriptor> {
    if !is_finite_rect(frame) {
        return None;
    }
    let mut best: Option<(&DisplayDescriptor, f64)> = None;
    for display in displays.iter().filter(|d| d.is_finite()) {
        let overlap = frame.intersect(display.frame);
        if is_degenerate(overlap) {
            continue;
        }
        let area = overlap.area();
        match best {
            Some((_, best_area)) if best_area >= area => {}
            _ => best = Some((display, area)),
        }
    }
    best.map(|(display, _)| display)
}

fn is_degenerate(rect: Rect) -> bool {
    !(rect.width() > 0.0 && rect.height() > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayId;

    fn display(x: f64, y: f64, w: f64, h: f64, scale: f64) -> DisplayDescriptor {
        DisplayDescriptor::new(DisplayId(1), Rect::new(x, y, x + w, y + h), scale)
    }

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::from_origin_size((x, y), (w, h))
    }

    #[test]
    fn test_flip_matches_worked_example() {
        let d = display(0.0, 0.0, 1920.0, 1080.0, 1.0);
        let hole = to_local_hole(rect(100.0, 100.0, 400.0, 300.0), &d).unwrap();
        assert_eq!(hole, rect(100.0, 680.0, 400.0, 300.0));
    }

    #[test]
    fn test_secondary_display_translates_origin() {
        let d = display(1920.0, -200.0, 1280.0, 800.0, 2.0);
        let hole = to_local_hole(rect(2020.0, -100.0, 200.0, 100.0), &d).unwrap();
        // top = 100 in display space, flipped: 800 - 100 - 100 = 600
        assert_eq!(hole, rect(100.0, 600.0, 200.0, 100.0));
    }

    #[test]
    fn test_window_partially_offscreen_is_clipped() {
        let d = display(0.0, 0.0, 1000.0, 800.0, 1.0);
        let hole = to_local_hole(rect(-50.0, 700.0, 200.0, 300.0), &d).unwrap();
        assert_eq!(hole, Rect::new(0.0, 0.0, 150.0, 100.0));
    }

    #[test]
    fn test_window_on_other_display_yields_none() {
        let d = display(0.0, 0.0, 1000.0, 800.0, 1.0);
        assert!(to_local_hole(rect(1200.0, 0.0, 100.0, 100.0), &d).is_none());
        // Touching an edge is zero-area.
        assert!(to_local_hole(rect(1000.0, 0.0, 100.0, 100.0), &d).is_none());
    }

    #[test]
    fn test_non_finite_geometry_is_rejected() {
        let bad = display(f64::NAN, 0.0, 1000.0, 800.0, 1.0);
        assert!(to_local_hole(rect(0.0, 0.0, 10.0, 10.0), &bad).is_none());

        let d = display(0.0, 0.0, 1000.0, 800.0, 1.0);
        assert!(to_local_hole(rect(f64::INFINITY, 0.0, 10.0, 10.0), &d).is_none());
    }

    #[test]
    fn test_hole_always_inside_display_bounds() {
        let d = display(10.0, 20.0, 1000.3, 700.7, 1.5);
        let frames = [
            rect(10.0, 20.0, 1000.3, 700.7),
            rect(-500.0, -500.0, 3000.0, 3000.0),
            rect(15.2, 33.3, 10.01, 10.01),
            rect(1000.0, 700.0, 100.0, 100.0),
        ];
        let bounds = d.local_bounds();
        for frame in frames {
            if let Some(hole) = to_local_hole(frame, &d) {
                assert!(hole.x0 >= 0.0 && hole.y0 >= 0.0, "{hole:?}");
                assert!(hole.x1 <= bounds.x1 && hole.y1 <= bounds.y1, "{hole:?}");
            }
        }
    }

    #[test]
    fn test_pixel_align_snaps_outward() {
        let aligned = pixel_align(Rect::new(10.3, 10.7, 20.2, 20.6), 2.0);
        assert_eq!(aligned, Rect::new(10.0, 10.5, 20.5, 21.0));
    }

    #[test]
    fn test_pixel_align_is_idempotent() {
        let samples = [
            Rect::new(0.1, 0.2, 33.33, 47.77),
            Rect::new(-12.345, 7.0, 99.999, 100.001),
            Rect::new(1.0 / 3.0, 2.0 / 3.0, 10.0 / 3.0, 11.0 / 3.0),
        ];
        for scale in [1.0, 1.5, 2.0, 3.0, 1.0 / 3.0] {
            for rect in samples {
                let once = pixel_align(rect, scale);
                assert_eq!(pixel_align(once, scale), once, "scale {scale}, rect {rect:?}");
            }
        }
    }

    #[test]
    fn test_pixel_align_invalid_scale_falls_back_to_points() {
        let aligned = pixel_align(Rect::new(0.5, 0.5, 1.5, 1.5), 0.0);
        assert_eq!(aligned, Rect::new(0.0, 0.0, 2.0, 2.0));
    }

    #[test]
    fn test_frames_match_tolerance() {
        let screen = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        assert!(frames_match(screen, screen, FULL_SCREEN_TOLERANCE));
        assert!(frames_match(Rect::new(0.5, 0.0, 1920.0, 1080.9), screen, FULL_SCREEN_TOLERANCE));
        assert!(!frames_match(Rect::new(0.0, 0.0, 1918.0, 1080.0), screen, FULL_SCREEN_TOLERANCE));
    }

    #[test]
    fn test_display_for_frame_prefers_largest_overlap() {
        let left = DisplayDescriptor::new(DisplayId(1), Rect::new(0.0, 0.0, 1000.0, 800.0), 1.0);
        let right = DisplayDescriptor::new(DisplayId(2), Rect::new(1000.0, 0.0, 2000.0, 800.0), 1.0);
        let displays = [left, right];

        let mostly_right = rect(900.0, 100.0, 400.0, 200.0);
        assert_eq!(display_for_frame(mostly_right, &displays).map(|d| d.id), Some(DisplayId(2)));

        let nowhere = rect(5000.0, 5000.0, 10.0, 10.0);
        assert!(display_for_frame(nowhere, &displays).is_none());
    }
}
