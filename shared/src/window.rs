use std::fmt;
use std::hash::{Hash, Hasher};

use kurbo::Rect;

use crate::display::DisplayId;

/// Identifier of an on-screen window, unique for the lifetime of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowId {
    /// Window number reported by the window server.
    Native(u32),
    /// Derived from the accessibility element when no window number exists.
    Synthetic(u64),
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowId::Native(number) => write!(f, "{number}"),
            WindowId::Synthetic(hash) => write!(f, "synthetic:{hash:016x}"),
        }
    }
}

/// One window to keep undimmed during a refresh cycle.
///
/// Equality and hashing cover identity, display and geometry only: two
/// snapshots that agree on those render identically whoever owns them.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub window_id: WindowId,
    /// Global top-left-origin frame.
    pub frame: Rect,
    pub screen_id: DisplayId,
    /// Bundle identifier of the owning application, after remapping.
    pub owner: Option<String>,
}

impl PartialEq for WindowSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.window_id == other.window_id
            && self.screen_id == other.screen_id
            && self.frame == other.frame
    }
}

// Frames are validated finite before a snapshot is built.
impl Eq for WindowSnapshot {}

impl Hash for WindowSnapshot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.window_id.hash(state);
        self.screen_id.hash(state);
        for edge in [self.frame.x0, self.frame.y0, self.frame.x1, self.frame.y1] {
            // -0.0 == 0.0 but their bit patterns differ.
            (edge + 0.0).to_bits().hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn snapshot(owner: Option<&str>) -> WindowSnapshot {
        WindowSnapshot {
            window_id: WindowId::Native(42),
            frame: Rect::new(0.0, 0.0, 100.0, 100.0),
            screen_id: DisplayId(1),
            owner: owner.map(str::to_string),
        }
    }

    #[test]
    fn test_owner_does_not_affect_identity() {
        let a = snapshot(Some("com.example.editor"));
        let b = snapshot(None);
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_moved_window_is_a_different_snapshot() {
        let a = snapshot(None);
        let mut b = snapshot(None);
        b.frame = Rect::new(1.0, 0.0, 101.0, 100.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signed_zero_edges_hash_alike() {
        let a = snapshot(None);
        let mut b = snapshot(None);
        b.frame = Rect::new(-0.0, -0.0, 100.0, 100.0);
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_window_id_display() {
        assert_eq!(WindowId::Native(7).to_string(), "7");
        assert_eq!(WindowId::Synthetic(0xff).to_string(), "synthetic:00000000000000ff");
    }
}
