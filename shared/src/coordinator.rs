// Focus coordinator: lifecycle, event routing and the refresh cycle.
//
// Runs entirely on the control thread. Every event becomes a refresh
// request; requests are debounced into at most one pending refresh, which
// the host's one-shot timer eventually fires through `fire_timer`. A refresh
// re-synchronizes displays, asks the resolver what is focused, and pushes
// one render command per display.
//
// Run state (`start`/`stop`) is independent of the enabled and suspended
// flags. A refresh only renders when running, enabled and not suspended.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::{AppConfig, FocusConfiguration};
use crate::display::DisplayId;
use crate::errors::DimmerError;
use crate::events::{
    AxNotification, ObserverHandler, ObserverTable, Pid, SubscriptionSet, SystemEvent, Topic,
};
use crate::geometry::{frames_match, to_local_hole, FULL_SCREEN_TOLERANCE};
use crate::overlay::RenderCommand;
use crate::platform::{
    Clock, DeferredExecutor, DisplayEnumerator, EventSource, SurfaceFactory, WindowIntrospection,
};
use crate::registry::{DisplayRegistry, SyncReport};
use crate::resolver::WindowFocusResolver;
use crate::scheduler::{RefreshDebouncer, Throttle, ACCESSIBILITY_THROTTLE, POINTER_THROTTLE};
use crate::window::WindowSnapshot;

/// Topics subscribed for the whole time the coordinator runs.
const BASE_TOPICS: [Topic; 6] = [
    Topic::ApplicationActivated,
    Topic::ApplicationDeactivated,
    Topic::ActiveSpaceChanged,
    Topic::ScreenParametersChanged,
    Topic::SystemUi,
    Topic::Accessibility,
];

/// The platform services a coordinator drives.
pub struct Platform<A: WindowIntrospection> {
    pub introspection: A,
    pub displays: Box<dyn DisplayEnumerator>,
    pub surfaces: Box<dyn SurfaceFactory>,
    pub events: Box<dyn EventSource>,
    pub timer: Box<dyn DeferredExecutor>,
    pub clock: Box<dyn Clock>,
}

pub struct FocusCoordinator<A: WindowIntrospection> {
    platform: Platform<A>,
    config: FocusConfiguration,
    exclusions: BTreeSet<String>,
    intensity: f64,

    running: bool,
    enabled: bool,
    suspended: bool,

    resolver: WindowFocusResolver,
    registry: DisplayRegistry,
    debouncer: RefreshDebouncer,
    pointer_throttle: Throttle,
    accessibility_throttle: Throttle,
    subscriptions: SubscriptionSet,
    observers: ObserverTable,
    /// Frontmost application at the last refresh, observed or not.
    frontmost_pid: Option<Pid>,
    /// Snapshots from the last resolver query, reused by `set_intensity`.
    last_known: Vec<WindowSnapshot>,
}

impl<A: WindowIntrospection> FocusCoordinator<A> {
    pub fn new(platform: Platform<A>, settings: &AppConfig) -> Self {
        let settings = settings.clone().sanitized();
        Self {
            platform,
            config: settings.focus,
            exclusions: settings.excluded_bundles,
            intensity: settings.intensity,
            running: false,
            enabled: settings.is_enabled,
            suspended: false,
            resolver: WindowFocusResolver::new(),
            registry: DisplayRegistry::new(),
            debouncer: RefreshDebouncer::new(),
            pointer_throttle: Throttle::new(POINTER_THROTTLE),
            accessibility_throttle: Throttle::new(ACCESSIBILITY_THROTTLE),
            subscriptions: SubscriptionSet::new(),
            observers: ObserverTable::new(),
            frontmost_pid: None,
            last_known: Vec::new(),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!(event = "focus.coordinator.start_started");

        self.synchronize_screens();
        for topic in BASE_TOPICS {
            self.subscribe(topic);
        }
        self.sync_pointer_subscription();
        self.refresh(false);

        info!(
            event = "focus.coordinator.start_completed",
            displays = self.registry.len(),
            subscriptions = self.subscriptions.len()
        );
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        for token in self.subscriptions.take_all() {
            self.platform.events.unsubscribe(token);
        }
        self.debouncer.cancel();
        self.platform.timer.disarm();
        self.registry.hide_all(false);

        for pid in self.observers.drain_pids() {
            self.platform.introspection.unobserve_application(pid);
        }
        self.frontmost_pid = None;
        self.resolver.reset_latch();
        self.pointer_throttle.reset();
        self.accessibility_throttle.reset();

        info!(event = "focus.coordinator.stop_completed");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // ── Settings ────────────────────────────────────────────────────────────

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        info!(event = "focus.coordinator.enabled_changed", enabled);

        if enabled {
            self.request_refresh(true);
        } else {
            self.debouncer.cancel();
            self.platform.timer.disarm();
            self.registry.hide_all(true);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Change dimming strength, repainting the last known holes without
    /// querying the resolver.
    pub fn set_intensity(&mut self, intensity: f64) {
        if !intensity.is_finite() {
            warn!(event = "focus.coordinator.intensity_rejected", intensity);
            return;
        }
        self.intensity = intensity.clamp(0.0, 1.0);
        if self.is_active() {
            let snapshots = self.last_known.clone();
            self.render(&snapshots, false);
        }
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn configuration(&self) -> &FocusConfiguration {
        &self.config
    }

    /// Replace the focus configuration and apply side effects for the fields
    /// that changed.
    pub fn update_configuration(&mut self, next: FocusConfiguration) {
        let next = next.sanitized();
        if next == self.config {
            return;
        }
        let follow_mouse_changed = next.follow_mouse != self.config.follow_mouse;
        let animation_changed = next.animation_duration != self.config.animation_duration;
        self.config = next;

        if animation_changed {
            self.registry.set_animation(self.config.animation());
        }
        if follow_mouse_changed {
            self.resolver.reset_latch();
            self.sync_pointer_subscription();
        }
        debug!(
            event = "focus.coordinator.configuration_updated",
            mode = ?self.config.mode,
            follow_mouse = self.config.follow_mouse
        );
        self.request_refresh(true);
    }

    pub fn set_excluded_bundles(&mut self, exclusions: BTreeSet<String>) {
        self.exclusions = exclusions;
        self.request_refresh(true);
    }

    pub fn excluded_bundles(&self) -> &BTreeSet<String> {
        &self.exclusions
    }

    /// Pause rendering while a system overview UI is on screen.
    pub fn suspend_for_system_ui(&mut self, suspended: bool) {
        if self.suspended == suspended {
            return;
        }
        self.suspended = suspended;
        debug!(event = "focus.coordinator.suspension_changed", suspended);

        if suspended {
            self.debouncer.cancel();
            self.platform.timer.disarm();
            self.registry.hide_all(true);
        } else {
            self.request_refresh(true);
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    // ── Inspection ──────────────────────────────────────────────────────────

    pub fn last_known(&self) -> &[WindowSnapshot] {
        &self.last_known
    }

    pub fn registry(&self) -> &DisplayRegistry {
        &self.registry
    }

    pub fn observers(&self) -> &ObserverTable {
        &self.observers
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    // ── Events and scheduling ───────────────────────────────────────────────

    /// Route an OS event delivered on the control thread.
    pub fn handle_event(&mut self, event: SystemEvent) {
        if !self.running || !self.subscriptions.is_subscribed(event.topic()) {
            trace!(event = "focus.coordinator.event_ignored", topic = ?event.topic());
            return;
        }
        let now = self.platform.clock.now();

        match event {
            SystemEvent::ApplicationActivated { .. }
            | SystemEvent::ApplicationDeactivated { .. }
            | SystemEvent::ActiveSpaceChanged => self.request_refresh(true),
            SystemEvent::ScreenParametersChanged => {
                self.synchronize_screens();
                self.request_refresh(false);
            }
            SystemEvent::SystemUiEntered => self.suspend_for_system_ui(true),
            SystemEvent::SystemUiExited => self.suspend_for_system_ui(false),
            SystemEvent::PointerMoved { .. } => {
                if self.pointer_throttle.admit(now) {
                    self.request_refresh(false);
                } else {
                    let wait = self.pointer_throttle.remaining(now);
                    self.defer_refresh(false, wait);
                }
            }
            SystemEvent::Accessibility { pid, notification } => {
                if !self.observers.contains(pid) {
                    trace!(event = "focus.coordinator.stale_observer_event", pid);
                    return;
                }
                let animated = !matches!(
                    notification,
                    AxNotification::WindowMoved | AxNotification::WindowResized
                );
                if self.accessibility_throttle.admit(now) {
                    self.request_refresh(animated);
                } else {
                    // The last move of a drag must still land.
                    let wait = self.accessibility_throttle.remaining(now);
                    self.defer_refresh(animated, wait);
                }
            }
        }
    }

    /// Queue a debounced refresh, superseding any pending one.
    pub fn request_refresh(&mut self, animated: bool) {
        if !self.running {
            return;
        }
        let now = self.platform.clock.now();
        let delay = self.debouncer.request(animated, now);
        self.platform.timer.arm(delay);
    }

    /// Queue a refresh `delay` from now unless one is already pending.
    fn defer_refresh(&mut self, animated: bool, delay: Duration) {
        if !self.running {
            return;
        }
        let now = self.platform.clock.now();
        if let Some(wait) = self.debouncer.request_after(animated, now, delay) {
            trace!(event = "focus.coordinator.refresh_deferred", wait_ms = wait.as_millis() as u64);
            self.platform.timer.arm(wait);
        }
    }

    /// Called by the host when the armed one-shot timer elapses.
    pub fn fire_timer(&mut self) {
        let now = self.platform.clock.now();
        match self.debouncer.take_due(now) {
            Ok(Some(pending)) => self.refresh(pending.animated),
            Ok(None) => {}
            Err(remaining) => self.platform.timer.arm(remaining),
        }
    }

    /// Diff the display topology against the registry.
    pub fn synchronize_screens(&mut self) -> SyncReport {
        let displays = self.platform.displays.displays();
        self.registry.synchronize(
            &displays,
            self.platform.surfaces.as_mut(),
            self.config.animation(),
        )
    }

    // ── Refresh cycle ───────────────────────────────────────────────────────

    fn is_active(&self) -> bool {
        self.running && self.enabled && !self.suspended
    }

    /// Run one refresh cycle immediately.
    pub fn refresh(&mut self, animated: bool) {
        if !self.is_active() {
            return;
        }
        let now = self.platform.clock.now();
        self.debouncer.mark_started(now);

        self.prepare_observer();
        self.synchronize_screens();

        let displays = self.registry.descriptors();
        let snapshots = self.resolver.focused_windows(
            &self.platform.introspection,
            &self.config,
            &self.exclusions,
            &displays,
            now,
        );
        self.render(&snapshots, animated);

        // Hysteresis kept a stale window; look again once it lapses.
        if let Some(wait) = self.resolver.recheck_in(now) {
            self.defer_refresh(false, wait);
        }

        debug!(
            event = "focus.coordinator.refresh_completed",
            animated,
            windows = snapshots.len(),
            displays = displays.len()
        );
        self.last_known = snapshots;
    }

    /// Watch the frontmost application's window notifications, dropping the
    /// observer of the previous one.
    fn prepare_observer(&mut self) {
        let frontmost = self.platform.introspection.frontmost_application();
        let pid = frontmost.as_ref().map(|app| app.pid);
        if pid == self.frontmost_pid {
            return;
        }

        if let Some(previous) = self.frontmost_pid.take() {
            if let Some(handler) = self.observers.remove(previous) {
                self.platform.introspection.unobserve_application(previous);
                let observed = self.platform.clock.now().saturating_duration_since(handler.installed_at);
                debug!(
                    event = "focus.coordinator.observer_released",
                    pid = previous,
                    bundle_id = handler.bundle_id.as_deref().unwrap_or_default(),
                    observed_ms = observed.as_millis() as u64
                );
            }
        }
        self.frontmost_pid = pid;

        let Some(app) = frontmost else {
            return;
        };
        match self.platform.introspection.observe_application(app.pid) {
            Ok(()) => {
                let handler = ObserverHandler {
                    bundle_id: app.bundle_id,
                    installed_at: self.platform.clock.now(),
                };
                self.observers.register(app.pid, handler);
            }
            Err(e) => {
                warn!(
                    event = "focus.coordinator.observer_install_failed",
                    pid = app.pid,
                    error_code = e.error_code(),
                    error = %e
                );
            }
        }
    }

    fn render(&mut self, snapshots: &[WindowSnapshot], animated: bool) {
        let mut by_display: BTreeMap<DisplayId, Vec<&WindowSnapshot>> = BTreeMap::new();
        for snapshot in snapshots {
            if self.registry.contains(snapshot.screen_id) {
                by_display.entry(snapshot.screen_id).or_default().push(snapshot);
            } else {
                trace!(
                    event = "focus.coordinator.snapshot_dropped",
                    window_id = %snapshot.window_id,
                    display_id = %snapshot.screen_id
                );
            }
        }

        for renderer in self.registry.renderers_mut() {
            let display = *renderer.display();
            if !display.is_finite() {
                renderer.set_hidden(true, false);
                continue;
            }
            let Some(windows) = by_display.get(&display.id) else {
                renderer.set_hidden(true, animated);
                continue;
            };

            let full_screen = windows
                .iter()
                .any(|w| frames_match(w.frame, display.frame, FULL_SCREEN_TOLERANCE));
            let (dim_alpha, holes) = if full_screen {
                (0.0, Vec::new())
            } else {
                let holes = windows
                    .iter()
                    .filter_map(|w| to_local_hole(w.frame, &display))
                    .collect();
                (self.intensity, holes)
            };

            let command = RenderCommand {
                dim_alpha,
                holes,
                corner_radius: self.config.corner_radius,
                feather: self.config.feather,
            };
            renderer.update(&command, &self.config, animated);
        }
    }

    fn subscribe(&mut self, topic: Topic) {
        match self.platform.events.subscribe(topic) {
            Some(token) => self.subscriptions.insert(token, topic),
            None => warn!(event = "focus.coordinator.subscribe_failed", topic = ?topic),
        }
    }

    fn sync_pointer_subscription(&mut self) {
        let wanted = self.running && self.config.follow_mouse;
        let active = self.subscriptions.is_subscribed(Topic::PointerMoved);
        if wanted && !active {
            self.subscribe(Topic::PointerMoved);
        } else if !wanted && active {
            for token in self.subscriptions.take_topic(Topic::PointerMoved) {
                self.platform.events.unsubscribe(token);
            }
            self.pointer_throttle.reset();
        }
    }
}
