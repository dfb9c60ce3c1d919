// Resolves which windows count as "focused" for the current refresh.
//
// Policy, in order:
//   • No permission or no frontmost application: nothing is focused.
//   • Frontmost application excluded: nothing is focused.
//   • Follow-mouse: the window under the pointer, latched with hysteresis
//     so brief crossings over other windows do not flicker the overlay.
//   • ActiveApp: every acceptable window of the frontmost application.
//   • ActiveWindow: its focused window, else its first acceptable window.
//
// Every candidate goes through the same filter. Window-switcher thumbnails
// are suppressed, file-picker style remote sheets are attributed to the
// application they are modal for, and anything without finite geometry or
// a display to live on is dropped. Failed queries drop the candidate; they
// never surface as errors.

use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

use kurbo::Point;
use tracing::{debug, trace};

use crate::config::{FocusConfiguration, FocusMode};
use crate::display::DisplayDescriptor;
use crate::geometry::{display_for_frame, is_finite_rect};
use crate::platform::WindowIntrospection;
use crate::window::{WindowId, WindowSnapshot};

/// Minimum dwell before a new hit target may replace the latched window.
pub const HYSTERESIS: Duration = Duration::from_millis(200);

/// Parent hops allowed when walking up from a hit-tested element.
pub const MAX_ELEMENT_HOPS: usize = 8;

pub const WINDOW_ROLE: &str = "AXWindow";
pub const APPLICATION_ROLE: &str = "AXApplication";
pub const UNKNOWN_SUBROLE: &str = "AXUnknown";

/// Owners of thumbnail surfaces shown by the window switcher, Mission
/// Control and Stage Manager. They are never real focus targets.
pub const WINDOW_SWITCHER_BUNDLES: &[&str] = &["com.apple.dock", "com.apple.WindowManager"];

/// Out-of-process hosts for panels that logically belong to another app.
pub const REMOTE_SHEET_HOSTS: &[&str] = &[
    "com.apple.appkit.xpc.openAndSavePanelService",
    "com.apple.ViewBridgeAuxiliary",
];

#[derive(Debug, Clone)]
struct Latched {
    snapshot: WindowSnapshot,
    at: Instant,
}

/// Follow-mouse hysteresis state.
#[derive(Debug, Default)]
pub struct MouseLatch {
    latched: Option<Latched>,
    /// Set while the latch is overriding a different hit-test result.
    held_until: Option<Instant>,
}

impl MouseLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine a fresh hit-test result with the latched window.
    ///
    /// Returns `None` when there is no hit and the latch has expired, which
    /// tells the caller to fall back to mode-based resolution.
    pub fn resolve(&mut self, hit: Option<WindowSnapshot>, now: Instant) -> Option<WindowSnapshot> {
        let within_hysteresis = self
            .latched
            .as_ref()
            .is_some_and(|l| now.saturating_duration_since(l.at) < HYSTERESIS);

        self.held_until = None;

        match hit {
            Some(hit) => {
                if let Some(latched) = self.latched.as_mut() {
                    if latched.snapshot.window_id == hit.window_id {
                        // Same window; follow its geometry, keep the latch time.
                        latched.snapshot = hit.clone();
                        return Some(hit);
                    }
                    if within_hysteresis {
                        self.held_until = Some(latched.at + HYSTERESIS);
                        return Some(latched.snapshot.clone());
                    }
                }
                self.latched = Some(Latched { snapshot: hit.clone(), at: now });
                Some(hit)
            }
            None if within_hysteresis => {
                let latched = self.latched.as_ref()?;
                self.held_until = Some(latched.at + HYSTERESIS);
                Some(latched.snapshot.clone())
            }
            None => None,
        }
    }

    /// Time left before the last `resolve` stops overriding the hit test,
    /// or `None` when it returned the hit itself.
    pub fn release_in(&self, now: Instant) -> Option<Duration> {
        self.held_until.map(|until| until.saturating_duration_since(now))
    }

    pub fn reset(&mut self) {
        self.latched = None;
        self.held_until = None;
    }
}

#[derive(Debug, Default)]
pub struct WindowFocusResolver {
    latch: MouseLatch,
}

impl WindowFocusResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_latch(&mut self) {
        self.latch.reset();
    }

    /// How long until the follow-mouse result of the last query may change
    /// without the pointer moving again.
    pub fn recheck_in(&self, now: Instant) -> Option<Duration> {
        self.latch.release_in(now)
    }

    /// The windows to keep undimmed right now.
    pub fn focused_windows<A: WindowIntrospection>(
        &mut self,
        ax: &A,
        config: &FocusConfiguration,
        exclusions: &BTreeSet<String>,
        displays: &[DisplayDescriptor],
        now: Instant,
    ) -> Vec<WindowSnapshot> {
        self.latch.held_until = None;
        if !ax.is_trusted() {
            trace!(event = "focus.resolver.untrusted");
            return Vec::new();
        }
        let Some(app) = ax.frontmost_application() else {
            return Vec::new();
        };
        if app.bundle_id.as_ref().is_some_and(|id| exclusions.contains(id)) {
            debug!(
                event = "focus.resolver.frontmost_excluded",
                bundle_id = app.bundle_id.as_deref().unwrap_or_default()
            );
            return Vec::new();
        }

        if config.follow_mouse {
            let hit = ax
                .pointer_location()
                .and_then(|point| hit_test_window(ax, point))
                .and_then(|element| snapshot_for(ax, &element, exclusions, displays));
            if let Some(snapshot) = self.latch.resolve(hit, now) {
                return vec![snapshot];
            }
        }

        match config.mode {
            FocusMode::ActiveApp => {
                let mut seen = HashSet::new();
                ax.windows(app.pid)
                    .iter()
                    .filter_map(|element| snapshot_for(ax, element, exclusions, displays))
                    .filter(|snapshot| seen.insert(snapshot.window_id))
                    .collect()
            }
            FocusMode::ActiveWindow => ax
                .focused_window(app.pid)
                .and_then(|element| snapshot_for(ax, &element, exclusions, displays))
                .or_else(|| {
                    ax.windows(app.pid)
                        .iter()
                        .find_map(|element| snapshot_for(ax, element, exclusions, displays))
                })
                .into_iter()
                .collect(),
        }
    }
}

/// Walk up from the element under `point` to the window that contains it.
fn hit_test_window<A: WindowIntrospection>(ax: &A, point: Point) -> Option<A::Element> {
    let mut element = ax.element_at(point)?;
    for _ in 0..MAX_ELEMENT_HOPS {
        if ax.role(&element).as_deref() == Some(WINDOW_ROLE) {
            return Some(element);
        }
        element = ax.parent(&element)?;
    }
    (ax.role(&element).as_deref() == Some(WINDOW_ROLE)).then_some(element)
}

/// Bundle identifier owning `element`: its own attribute, else the nearest
/// application ancestor's.
fn owner_of<A: WindowIntrospection>(ax: &A, element: &A::Element) -> Option<String> {
    if let Some(bundle_id) = ax.bundle_id(element) {
        return Some(bundle_id);
    }
    let mut current = ax.parent(element)?;
    for _ in 0..MAX_ELEMENT_HOPS {
        if ax.role(&current).as_deref() == Some(APPLICATION_ROLE) {
            if let Some(bundle_id) = ax.bundle_id(&current) {
                return Some(bundle_id);
            }
        }
        current = ax.parent(&current)?;
    }
    None
}

/// Apply the candidate filter and build a snapshot, or drop the candidate.
fn snapshot_for<A: WindowIntrospection>(
    ax: &A,
    element: &A::Element,
    exclusions: &BTreeSet<String>,
    displays: &[DisplayDescriptor],
) -> Option<WindowSnapshot> {
    let mut owner = owner_of(ax, element);

    if let Some(id) = owner.as_deref() {
        if WINDOW_SWITCHER_BUNDLES.contains(&id) {
            trace!(event = "focus.resolver.switcher_suppressed", bundle_id = id);
            return None;
        }
        if REMOTE_SHEET_HOSTS.contains(&id) {
            if let Some(parent_owner) = ax
                .modal_parent(element)
                .and_then(|parent| owner_of(ax, &parent))
            {
                trace!(
                    event = "focus.resolver.remote_sheet_remapped",
                    host = id,
                    owner = parent_owner.as_str()
                );
                owner = Some(parent_owner);
            }
        }
    }

    if owner.as_ref().is_some_and(|id| exclusions.contains(id)) {
        return None;
    }
    if ax.subrole(element).as_deref() == Some(UNKNOWN_SUBROLE) {
        return None;
    }

    let frame = ax.frame(element).filter(|f| is_finite_rect(*f))?;
    if !(frame.width() > 0.0 && frame.height() > 0.0) {
        return None;
    }
    let display = display_for_frame(frame, displays)?;

    let window_id = match ax.window_number(element) {
        Some(number) => WindowId::Native(number),
        None => {
            let id = WindowId::Synthetic(ax.element_identity(element));
            debug!(event = "focus.resolver.synthetic_window_id", window_id = %id);
            id
        }
    };

    Some(WindowSnapshot {
        window_id,
        frame,
        screen_id: display.id,
        owner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayId;
    use crate::errors::ObserverError;
    use crate::events::Pid;
    use crate::platform::RunningApp;
    use kurbo::Rect;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Default)]
    struct Node {
        role: Option<&'static str>,
        subrole: Option<&'static str>,
        frame: Option<Rect>,
        bundle_id: Option<&'static str>,
        parent: Option<usize>,
        modal_parent: Option<usize>,
        number: Option<u32>,
    }

    #[derive(Default)]
    struct FakeAx {
        trusted: bool,
        frontmost: Option<RunningApp>,
        nodes: Vec<Node>,
        windows: HashMap<Pid, Vec<usize>>,
        focused: HashMap<Pid, usize>,
        pointer: Option<Point>,
        hit: Option<usize>,
    }

    impl FakeAx {
        fn add(&mut self, node: Node) -> usize {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    impl WindowIntrospection for FakeAx {
        type Element = usize;

        fn is_trusted(&self) -> bool {
            self.trusted
        }
        fn frontmost_application(&self) -> Option<RunningApp> {
            self.frontmost.clone()
        }
        fn windows(&self, pid: Pid) -> Vec<usize> {
            self.windows.get(&pid).cloned().unwrap_or_default()
        }
        fn focused_window(&self, pid: Pid) -> Option<usize> {
            self.focused.get(&pid).copied()
        }
        fn element_at(&self, _point: Point) -> Option<usize> {
            self.hit
        }
        fn pointer_location(&self) -> Option<Point> {
            self.pointer
        }
        fn role(&self, e: &usize) -> Option<String> {
            self.nodes[*e].role.map(str::to_string)
        }
        fn subrole(&self, e: &usize) -> Option<String> {
            self.nodes[*e].subrole.map(str::to_string)
        }
        fn frame(&self, e: &usize) -> Option<Rect> {
            self.nodes[*e].frame
        }
        fn bundle_id(&self, e: &usize) -> Option<String> {
            self.nodes[*e].bundle_id.map(str::to_string)
        }
        fn pid(&self, _e: &usize) -> Option<Pid> {
            None
        }
        fn parent(&self, e: &usize) -> Option<usize> {
            self.nodes[*e].parent
        }
        fn modal_parent(&self, e: &usize) -> Option<usize> {
            self.nodes[*e].modal_parent
        }
        fn window_number(&self, e: &usize) -> Option<u32> {
            self.nodes[*e].number
        }
        fn element_identity(&self, e: &usize) -> u64 {
            0xabc0 + *e as u64
        }
        fn observe_application(&mut self, _pid: Pid) -> Result<(), ObserverError> {
            Ok(())
        }
        fn unobserve_application(&mut self, _pid: Pid) {}
    }

    const EDITOR: &str = "com.example.editor";

    fn displays() -> Vec<DisplayDescriptor> {
        vec![
            DisplayDescriptor::new(DisplayId(1), Rect::new(0.0, 0.0, 1920.0, 1080.0), 2.0),
            DisplayDescriptor::new(DisplayId(2), Rect::new(1920.0, 0.0, 3840.0, 1080.0), 1.0),
        ]
    }

    fn window(number: u32, frame: Rect) -> Node {
        Node {
            role: Some(WINDOW_ROLE),
            subrole: Some("AXStandardWindow"),
            frame: Some(frame),
            bundle_id: Some(EDITOR),
            number: Some(number),
            ..Node::default()
        }
    }

    /// Frontmost editor (pid 10) with two windows, the second one focused.
    fn editor() -> (FakeAx, usize, usize) {
        let mut ax = FakeAx { trusted: true, ..FakeAx::default() };
        ax.frontmost = Some(RunningApp { pid: 10, bundle_id: Some(EDITOR.into()) });
        let a = ax.add(window(1, Rect::new(100.0, 100.0, 500.0, 400.0)));
        let b = ax.add(window(2, Rect::new(2000.0, 100.0, 2400.0, 400.0)));
        ax.windows.insert(10, vec![a, b]);
        ax.focused.insert(10, b);
        (ax, a, b)
    }

    fn resolve(ax: &FakeAx, config: &FocusConfiguration, exclusions: &BTreeSet<String>) -> Vec<WindowSnapshot> {
        WindowFocusResolver::new().focused_windows(ax, config, exclusions, &displays(), Instant::now())
    }

    fn ids(snapshots: &[WindowSnapshot]) -> Vec<WindowId> {
        snapshots.iter().map(|s| s.window_id).collect()
    }

    #[test]
    fn test_untrusted_yields_nothing() {
        let (mut ax, _, _) = editor();
        ax.trusted = false;
        assert!(resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_no_frontmost_yields_nothing() {
        let (mut ax, _, _) = editor();
        ax.frontmost = None;
        assert!(resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_excluded_frontmost_yields_nothing() {
        let (ax, _, _) = editor();
        let exclusions = BTreeSet::from([EDITOR.to_string()]);
        assert!(resolve(&ax, &FocusConfiguration::default(), &exclusions).is_empty());
    }

    #[test]
    fn test_active_app_returns_all_windows_with_screens() {
        let (ax, _, _) = editor();
        let snapshots = resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new());
        assert_eq!(ids(&snapshots), vec![WindowId::Native(1), WindowId::Native(2)]);
        assert_eq!(snapshots[0].screen_id, DisplayId(1));
        assert_eq!(snapshots[1].screen_id, DisplayId(2));
        assert_eq!(snapshots[0].owner.as_deref(), Some(EDITOR));
    }

    #[test]
    fn test_active_window_returns_focused_window() {
        let (ax, _, _) = editor();
        let config = FocusConfiguration { mode: FocusMode::ActiveWindow, ..FocusConfiguration::default() };
        assert_eq!(ids(&resolve(&ax, &config, &BTreeSet::new())), vec![WindowId::Native(2)]);
    }

    #[test]
    fn test_active_window_falls_back_to_first_window() {
        let (mut ax, _, _) = editor();
        ax.focused.clear();
        let config = FocusConfiguration { mode: FocusMode::ActiveWindow, ..FocusConfiguration::default() };
        assert_eq!(ids(&resolve(&ax, &config, &BTreeSet::new())), vec![WindowId::Native(1)]);
    }

    #[test]
    fn test_unknown_subrole_and_bad_frames_are_dropped() {
        let (mut ax, a, b) = editor();
        ax.nodes[a].subrole = Some(UNKNOWN_SUBROLE);
        ax.nodes[b].frame = Some(Rect::new(f64::NAN, 0.0, 10.0, 10.0));
        assert!(resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_sheets_and_panels_are_kept() {
        let (mut ax, a, _) = editor();
        ax.nodes[a].subrole = Some("AXDialog");
        let snapshots = resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new());
        assert_eq!(snapshots.len(), 2);
    }

    #[test]
    fn test_offscreen_window_is_dropped() {
        let (mut ax, a, _) = editor();
        ax.nodes[a].frame = Some(Rect::new(-5000.0, -5000.0, -4000.0, -4000.0));
        assert_eq!(ids(&resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new())), vec![WindowId::Native(2)]);
    }

    #[test]
    fn test_owner_resolved_through_application_ancestor() {
        let (mut ax, a, _) = editor();
        let app = ax.add(Node { role: Some(APPLICATION_ROLE), bundle_id: Some(EDITOR), ..Node::default() });
        ax.nodes[a].bundle_id = None;
        ax.nodes[a].parent = Some(app);
        let snapshots = resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new());
        assert_eq!(snapshots[0].owner.as_deref(), Some(EDITOR));
    }

    #[test]
    fn test_switcher_windows_are_suppressed() {
        let (mut ax, a, _) = editor();
        ax.nodes[a].bundle_id = Some("com.apple.dock");
        assert_eq!(ids(&resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new())), vec![WindowId::Native(2)]);
    }

    #[test]
    fn test_remote_sheet_is_attributed_to_modal_parent() {
        let (mut ax, a, _) = editor();
        let panel = ax.add(Node {
            bundle_id: Some(REMOTE_SHEET_HOSTS[0]),
            modal_parent: Some(a),
            ..window(9, Rect::new(150.0, 150.0, 450.0, 350.0))
        });
        ax.windows.get_mut(&10).unwrap().push(panel);

        let snapshots = resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new());
        let sheet = snapshots.iter().find(|s| s.window_id == WindowId::Native(9)).unwrap();
        assert_eq!(sheet.owner.as_deref(), Some(EDITOR));

        // Exclusions follow the logical owner.
        let exclusions = BTreeSet::from([EDITOR.to_string()]);
        ax.frontmost = Some(RunningApp { pid: 10, bundle_id: Some("com.example.other".into()) });
        assert!(resolve(&ax, &FocusConfiguration::default(), &exclusions).is_empty());
    }

    #[test]
    fn test_missing_window_number_synthesizes_id() {
        let (mut ax, a, _) = editor();
        ax.nodes[a].number = None;
        let snapshots = resolve(&ax, &FocusConfiguration::default(), &BTreeSet::new());
        assert_eq!(snapshots[0].window_id, WindowId::Synthetic(0xabc0 + a as u64));
    }

    #[test]
    fn test_follow_mouse_walks_up_to_window() {
        let (mut ax, a, _) = editor();
        let group = ax.add(Node { role: Some("AXGroup"), parent: Some(a), ..Node::default() });
        let button = ax.add(Node { role: Some("AXButton"), parent: Some(group), ..Node::default() });
        ax.pointer = Some(Point::new(200.0, 200.0));
        ax.hit = Some(button);

        let config = FocusConfiguration { follow_mouse: true, ..FocusConfiguration::default() };
        assert_eq!(ids(&resolve(&ax, &config, &BTreeSet::new())), vec![WindowId::Native(1)]);
    }

    #[test]
    fn test_follow_mouse_gives_up_after_hop_limit() {
        let (mut ax, a, _) = editor();
        let mut child = a;
        for _ in 0..=MAX_ELEMENT_HOPS {
            child = ax.add(Node { role: Some("AXGroup"), parent: Some(child), ..Node::default() });
        }
        ax.pointer = Some(Point::new(200.0, 200.0));
        ax.hit = Some(child);

        // No window found: falls through to ActiveApp.
        let config = FocusConfiguration { follow_mouse: true, ..FocusConfiguration::default() };
        assert_eq!(resolve(&ax, &config, &BTreeSet::new()).len(), 2);
    }

    #[test]
    fn test_hysteresis_keeps_latched_window() {
        let (mut ax, a, b) = editor();
        ax.pointer = Some(Point::new(0.0, 0.0));
        let config = FocusConfiguration { follow_mouse: true, ..FocusConfiguration::default() };
        let mut resolver = WindowFocusResolver::new();
        let t0 = Instant::now();

        ax.hit = Some(a);
        let first = resolver.focused_windows(&ax, &config, &BTreeSet::new(), &displays(), t0);
        assert_eq!(ids(&first), vec![WindowId::Native(1)]);
        assert_eq!(resolver.recheck_in(t0), None);

        ax.hit = Some(b);
        let early = resolver.focused_windows(&ax, &config, &BTreeSet::new(), &displays(), t0 + Duration::from_millis(100));
        assert_eq!(ids(&early), vec![WindowId::Native(1)]);
        assert_eq!(
            resolver.recheck_in(t0 + Duration::from_millis(100)),
            Some(Duration::from_millis(100))
        );

        let late = resolver.focused_windows(&ax, &config, &BTreeSet::new(), &displays(), t0 + Duration::from_millis(250));
        assert_eq!(ids(&late), vec![WindowId::Native(2)]);
        assert_eq!(resolver.recheck_in(t0 + Duration::from_millis(250)), None);
    }

    #[test]
    fn test_latch_without_hit() {
        let snapshot = WindowSnapshot {
            window_id: WindowId::Native(5),
            frame: Rect::new(0.0, 0.0, 10.0, 10.0),
            screen_id: DisplayId(1),
            owner: None,
        };
        let mut latch = MouseLatch::new();
        let t0 = Instant::now();
        assert_eq!(latch.resolve(Some(snapshot.clone()), t0), Some(snapshot.clone()));
        assert_eq!(latch.resolve(None, t0 + Duration::from_millis(150)), Some(snapshot));
        assert_eq!(latch.release_in(t0 + Duration::from_millis(150)), Some(Duration::from_millis(50)));
        assert_eq!(latch.resolve(None, t0 + Duration::from_millis(200)), None);
        assert_eq!(latch.release_in(t0 + Duration::from_millis(200)), None);
    }
}
