use std::fmt;

use kurbo::{Point, Rect};

use crate::geometry::is_finite_rect;

/// Hardware identifier of a connected display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayId(pub u32);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected display as currently reported by the OS.
///
/// `frame` uses the same global top-left-origin coordinates as window frames.
/// Descriptors are rebuilt on every enumeration and never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayDescriptor {
    pub id: DisplayId,
    pub frame: Rect,
    /// Device pixels per point.
    pub scale: f64,
}

impl DisplayDescriptor {
    pub fn new(id: DisplayId, frame: Rect, scale: f64) -> Self {
        Self { id, frame, scale }
    }

    /// Display-local rectangle: origin at zero, size of the display.
    pub fn local_bounds(&self) -> Rect {
        Rect::from_origin_size(Point::ORIGIN, self.frame.size())
    }

    pub fn is_finite(&self) -> bool {
        is_finite_rect(self.frame) && self.scale.is_finite()
    }

    /// True when moving from `self` to `other` needs the surface resized.
    pub fn geometry_differs(&self, other: &DisplayDescriptor) -> bool {
        self.frame != other.frame || self.scale != other.scale
    }
}
