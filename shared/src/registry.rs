// Connected displays and the overlay that covers each one.
//
// Entries are created when a display first shows up in an enumeration,
// resized in place when its geometry changes, and removed when it stops
// being enumerated. Nothing is collected implicitly.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tracing::{debug, info};

use crate::display::{DisplayDescriptor, DisplayId};
use crate::overlay::OverlayRenderer;
use crate::platform::SurfaceFactory;

/// What a synchronization pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<DisplayId>,
    pub relocated: Vec<DisplayId>,
    pub removed: Vec<DisplayId>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.relocated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DisplayRegistry {
    renderers: BTreeMap<DisplayId, OverlayRenderer>,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `enumerated` against the registry and apply the differences.
    pub fn synchronize(
        &mut self,
        enumerated: &[DisplayDescriptor],
        factory: &mut dyn SurfaceFactory,
        animation: Duration,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        for display in enumerated {
            if !seen.insert(display.id) {
                continue;
            }
            match self.renderers.get_mut(&display.id) {
                Some(renderer) => {
                    if renderer.display().geometry_differs(display) {
                        renderer.relocate(*display);
                        report.relocated.push(display.id);
                    }
                }
                None if display.is_finite() => {
                    let surface = factory.create_surface(display);
                    self.renderers
                        .insert(display.id, OverlayRenderer::new(*display, surface, animation));
                    report.added.push(display.id);
                }
                None => {
                    let display_id = display.id;
                    debug!(event = "focus.registry.display_skipped", %display_id);
                }
            }
        }

        let gone: Vec<DisplayId> = self
            .renderers
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(mut renderer) = self.renderers.remove(&id) {
                renderer.order_out();
            }
            report.removed.push(id);
        }

        if !report.is_empty() {
            info!(
                event = "focus.registry.synchronized",
                added = report.added.len(),
                relocated = report.relocated.len(),
                removed = report.removed.len(),
                displays = self.renderers.len()
            );
        }
        report
    }

    pub fn get(&self, id: DisplayId) -> Option<&OverlayRenderer> {
        self.renderers.get(&id)
    }

    pub fn get_mut(&mut self, id: DisplayId) -> Option<&mut OverlayRenderer> {
        self.renderers.get_mut(&id)
    }

    pub fn contains(&self, id: DisplayId) -> bool {
        self.renderers.contains_key(&id)
    }

    pub fn descriptors(&self) -> Vec<DisplayDescriptor> {
        self.renderers.values().map(|r| *r.display()).collect()
    }

    pub fn renderers_mut(&mut self) -> impl Iterator<Item = &mut OverlayRenderer> {
        self.renderers.values_mut()
    }

    pub fn hide_all(&mut self, animated: bool) {
        for renderer in self.renderers.values_mut() {
            renderer.set_hidden(true, animated);
        }
    }

    pub fn set_animation(&mut self, animation: Duration) {
        for renderer in self.renderers.values_mut() {
            renderer.set_animation(animation);
        }
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FocusConfiguration;
    use crate::overlay::{RenderCommand, SurfaceUpdate};
    use crate::platform::OverlaySurface;
    use kurbo::Rect;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct Log {
        created: Vec<DisplayId>,
        resized: Vec<(DisplayId, Rect)>,
        ordered_out: Vec<DisplayId>,
    }

    struct Surface {
        id: DisplayId,
        log: Rc<RefCell<Log>>,
    }

    impl OverlaySurface for Surface {
        fn set_frame(&mut self, display: &DisplayDescriptor) {
            self.log.borrow_mut().resized.push((self.id, display.frame));
        }
        fn present(&mut self, _update: &SurfaceUpdate) {}
        fn order_out(&mut self) {
            self.log.borrow_mut().ordered_out.push(self.id);
        }
    }

    struct Factory(Rc<RefCell<Log>>);

    impl SurfaceFactory for Factory {
        fn create_surface(&mut self, display: &DisplayDescriptor) -> Box<dyn OverlaySurface> {
            self.0.borrow_mut().created.push(display.id);
            Box::new(Surface { id: display.id, log: self.0.clone() })
        }
    }

    fn display(id: u32, x: f64) -> DisplayDescriptor {
        DisplayDescriptor::new(DisplayId(id), Rect::new(x, 0.0, x + 1920.0, 1080.0), 2.0)
    }

    const ANIMATION: Duration = Duration::from_millis(180);

    #[test]
    fn test_new_displays_get_surfaces() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut factory = Factory(log.clone());
        let mut registry = DisplayRegistry::new();

        let report = registry.synchronize(&[display(1, 0.0), display(2, 1920.0)], &mut factory, ANIMATION);
        assert_eq!(report.added, vec![DisplayId(1), DisplayId(2)]);
        assert_eq!(registry.len(), 2);
        assert_eq!(log.borrow().created.len(), 2);

        // Same topology again: nothing to do.
        let report = registry.synchronize(&[display(1, 0.0), display(2, 1920.0)], &mut factory, ANIMATION);
        assert!(report.is_empty());
        assert_eq!(log.borrow().created.len(), 2);
    }

    #[test]
    fn test_moved_display_is_resized_in_place() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut factory = Factory(log.clone());
        let mut registry = DisplayRegistry::new();
        registry.synchronize(&[display(1, 0.0), display(2, 1920.0)], &mut factory, ANIMATION);

        let report = registry.synchronize(&[display(1, 0.0), display(2, -1920.0)], &mut factory, ANIMATION);
        assert_eq!(report.relocated, vec![DisplayId(2)]);
        assert_eq!(log.borrow().created.len(), 2);
        assert_eq!(log.borrow().resized, vec![(DisplayId(2), display(2, -1920.0).frame)]);
        assert_eq!(registry.get(DisplayId(2)).unwrap().display().frame.x0, -1920.0);
    }

    #[test]
    fn test_disconnected_visible_display_is_removed() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut factory = Factory(log.clone());
        let mut registry = DisplayRegistry::new();
        registry.synchronize(&[display(1, 0.0), display(2, 1920.0)], &mut factory, ANIMATION);
        registry.get_mut(DisplayId(2)).unwrap().update(
            &RenderCommand { dim_alpha: 0.5, holes: vec![], corner_radius: 0.0, feather: 0.0 },
            &FocusConfiguration::default(),
            false,
        );

        let report = registry.synchronize(&[display(1, 0.0)], &mut factory, ANIMATION);
        assert_eq!(report.removed, vec![DisplayId(2)]);
        assert!(!registry.contains(DisplayId(2)));
        assert_eq!(log.borrow().ordered_out, vec![DisplayId(2)]);

        // Reconnected elsewhere: a fresh surface at the new geometry.
        let report = registry.synchronize(&[display(1, 0.0), display(2, 3840.0)], &mut factory, ANIMATION);
        assert_eq!(report.added, vec![DisplayId(2)]);
        assert_eq!(log.borrow().created, vec![DisplayId(1), DisplayId(2), DisplayId(2)]);
        let renderer = registry.get(DisplayId(2)).unwrap();
        assert_eq!(renderer.display().frame, display(2, 3840.0).frame);
        assert!(renderer.is_hidden());
    }

    #[test]
    fn test_non_finite_new_display_is_skipped() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut factory = Factory(log.clone());
        let mut registry = DisplayRegistry::new();

        let broken = DisplayDescriptor::new(DisplayId(3), Rect::new(f64::NAN, 0.0, 10.0, 10.0), 1.0);
        let report = registry.synchronize(&[broken], &mut factory, ANIMATION);
        assert!(report.added.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_known_display_with_transient_bad_frame_is_kept() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut factory = Factory(log.clone());
        let mut registry = DisplayRegistry::new();
        registry.synchronize(&[display(1, 0.0)], &mut factory, ANIMATION);

        let broken = DisplayDescriptor::new(DisplayId(1), Rect::new(f64::NAN, 0.0, 10.0, 10.0), 2.0);
        registry.synchronize(&[broken], &mut factory, ANIMATION);
        assert!(registry.contains(DisplayId(1)));
        assert!(log.borrow().resized.is_empty());
    }
}
