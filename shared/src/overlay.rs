// Dim-with-cutouts rendering for a single display.
//
// The shape is the full surface rectangle followed by one rounded rectangle
// per hole, filled with the even-odd rule so every hole punches through.
// The renderer remembers the last non-zero alpha it was asked for, so a
// hidden overlay can come back without a fresh render command.

use std::time::Duration;

use kurbo::{BezPath, Rect, RoundedRect, Shape};

use crate::config::FocusConfiguration;
use crate::display::DisplayDescriptor;
use crate::platform::OverlaySurface;

/// Flattening tolerance for the rounded hole corners, in points.
const PATH_TOLERANCE: f64 = 0.1;

/// What to draw on one display for one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCommand {
    pub dim_alpha: f64,
    /// Display-local, lower-left-origin rectangles.
    pub holes: Vec<Rect>,
    pub corner_radius: f64,
    pub feather: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    EaseInEaseOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub duration: Duration,
    pub curve: Curve,
}

impl Transition {
    /// `None` when the change should land immediately.
    pub fn for_change(animated: bool, duration: Duration) -> Option<Self> {
        (animated && !duration.is_zero()).then_some(Transition {
            duration,
            curve: Curve::EaseInEaseOut,
        })
    }
}

/// Surface rectangle minus rounded holes, even-odd filled.
#[derive(Debug, Clone, PartialEq)]
pub struct DimShape {
    pub bounds: Rect,
    pub holes: Vec<RoundedRect>,
}

impl DimShape {
    pub fn new(bounds: Rect, holes: &[Rect], corner_radius: f64) -> Self {
        let holes = holes
            .iter()
            .map(|hole| {
                let max_radius = hole.width().min(hole.height()) / 2.0;
                let radius = corner_radius.clamp(0.0, max_radius.max(0.0));
                RoundedRect::from_rect(*hole, radius)
            })
            .collect();
        Self { bounds, holes }
    }

    pub fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        path.extend(self.bounds.path_elements(PATH_TOLERANCE));
        for hole in &self.holes {
            path.extend(hole.path_elements(PATH_TOLERANCE));
        }
        path
    }

    /// Even-odd point test: inside the dim region and not inside an odd
    /// number of holes.
    pub fn dims_point(&self, point: kurbo::Point) -> bool {
        if !self.bounds.contains(point) {
            return false;
        }
        let covering = self.holes.iter().filter(|h| h.contains(point)).count();
        covering % 2 == 0
    }
}

/// Everything a surface needs to repaint.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceUpdate {
    /// `None` keeps the shape the surface already shows.
    pub shape: Option<DimShape>,
    pub opacity: f64,
    pub feather: f64,
    pub transition: Option<Transition>,
}

/// Drives one display's overlay surface.
pub struct OverlayRenderer {
    display: DisplayDescriptor,
    surface: Box<dyn OverlaySurface>,
    animation: Duration,
    feather: f64,
    remembered_alpha: f64,
    applied_alpha: f64,
    hidden: bool,
    shape: Option<DimShape>,
}

impl OverlayRenderer {
    /// Wrap a freshly created surface. It starts hidden.
    pub fn new(display: DisplayDescriptor, surface: Box<dyn OverlaySurface>, animation: Duration) -> Self {
        Self {
            display,
            surface,
            animation,
            feather: 0.0,
            remembered_alpha: 0.0,
            applied_alpha: 0.0,
            hidden: true,
            shape: None,
        }
    }

    pub fn display(&self) -> &DisplayDescriptor {
        &self.display
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn applied_alpha(&self) -> f64 {
        self.applied_alpha
    }

    pub fn remembered_alpha(&self) -> f64 {
        self.remembered_alpha
    }

    pub fn shape(&self) -> Option<&DimShape> {
        self.shape.as_ref()
    }

    pub fn set_animation(&mut self, animation: Duration) {
        self.animation = animation;
    }

    /// Track a display whose frame or scale changed, resizing the surface in place.
    pub fn relocate(&mut self, display: DisplayDescriptor) {
        self.display = display;
        if display.is_finite() {
            self.surface.set_frame(&display);
        }
    }

    /// Render `command`. Later calls win over transitions still in flight.
    pub fn update(&mut self, command: &RenderCommand, config: &FocusConfiguration, animated: bool) {
        self.animation = config.animation();
        let alpha = if command.dim_alpha.is_finite() {
            command.dim_alpha.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if alpha > 0.0 {
            self.remembered_alpha = alpha;
        }

        let shape = DimShape::new(self.display.local_bounds(), &command.holes, command.corner_radius);
        self.feather = command.feather.max(0.0);
        self.surface.present(&SurfaceUpdate {
            shape: Some(shape.clone()),
            opacity: alpha,
            feather: self.feather,
            transition: Transition::for_change(animated, self.animation),
        });

        self.shape = Some(shape);
        self.applied_alpha = alpha;
        self.hidden = alpha <= 0.0;
    }

    /// Fade out while keeping state, or restore the remembered alpha.
    pub fn set_hidden(&mut self, hidden: bool, animated: bool) {
        let target = if hidden { 0.0 } else { self.remembered_alpha };
        if hidden == self.hidden && target == self.applied_alpha {
            return;
        }
        if !hidden && self.shape.is_none() {
            // Nothing has been rendered yet; a render command will follow.
            return;
        }

        self.surface.present(&SurfaceUpdate {
            shape: None,
            opacity: target,
            feather: self.feather,
            transition: Transition::for_change(animated, self.animation),
        });
        self.applied_alpha = target;
        self.hidden = hidden || target <= 0.0;
    }

    /// Take the surface off screen at once; used when the display goes away.
    pub fn order_out(&mut self) {
        self.surface.order_out();
        self.applied_alpha = 0.0;
        self.hidden = true;
    }
}

impl std::fmt::Debug for OverlayRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayRenderer")
            .field("display", &self.display)
            .field("hidden", &self.hidden)
            .field("applied_alpha", &self.applied_alpha)
            .field("remembered_alpha", &self.remembered_alpha)
            .finish_non_exhaustive()
    }
}
