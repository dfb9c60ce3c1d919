// Boundaries to the services this core consumes but does not implement.
//
// Everything here is fallible in the soft sense: an unavailable attribute,
// a revoked permission or a vanished process shows up as `None` or an empty
// list. Only observer installation reports a reason, so it can be logged.

use std::time::{Duration, Instant};

use kurbo::{Point, Rect};

use crate::display::DisplayDescriptor;
use crate::errors::ObserverError;
use crate::events::{Pid, SubscriptionToken, Topic};
use crate::overlay::SurfaceUpdate;

/// The application currently holding input focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub pid: Pid,
    pub bundle_id: Option<String>,
}

/// Permission-gated window introspection (the accessibility service).
///
/// Calls are synchronous and made from the control thread, so
/// implementations must keep each one cheap.
pub trait WindowIntrospection {
    type Element: Clone;

    fn is_trusted(&self) -> bool;
    fn frontmost_application(&self) -> Option<RunningApp>;

    fn windows(&self, pid: Pid) -> Vec<Self::Element>;
    fn focused_window(&self, pid: Pid) -> Option<Self::Element>;
    /// Hit-test a point in global top-left-origin coordinates.
    fn element_at(&self, point: Point) -> Option<Self::Element>;
    fn pointer_location(&self) -> Option<Point>;

    fn role(&self, element: &Self::Element) -> Option<String>;
    fn subrole(&self, element: &Self::Element) -> Option<String>;
    /// Global top-left-origin frame.
    fn frame(&self, element: &Self::Element) -> Option<Rect>;
    fn bundle_id(&self, element: &Self::Element) -> Option<String>;
    fn pid(&self, element: &Self::Element) -> Option<Pid>;
    fn parent(&self, element: &Self::Element) -> Option<Self::Element>;
    /// The window a sheet or panel is modal for.
    fn modal_parent(&self, element: &Self::Element) -> Option<Self::Element>;
    fn window_number(&self, element: &Self::Element) -> Option<u32>;
    /// Stable-for-this-process hash of the element's identity.
    fn element_identity(&self, element: &Self::Element) -> u64;

    fn observe_application(&mut self, pid: Pid) -> Result<(), ObserverError>;
    fn unobserve_application(&mut self, pid: Pid);
}

pub trait DisplayEnumerator {
    fn displays(&self) -> Vec<DisplayDescriptor>;
}

/// One click-through overlay window covering a display.
pub trait OverlaySurface {
    /// Move/resize in place to a new global frame.
    fn set_frame(&mut self, display: &DisplayDescriptor);
    fn present(&mut self, update: &SurfaceUpdate);
    /// Remove from screen immediately, without a transition.
    fn order_out(&mut self);
}

pub trait SurfaceFactory {
    fn create_surface(&mut self, display: &DisplayDescriptor) -> Box<dyn OverlaySurface>;
}

/// Source of asynchronous OS events, delivered back through
/// `FocusCoordinator::handle_event`.
pub trait EventSource {
    fn subscribe(&mut self, topic: Topic) -> Option<SubscriptionToken>;
    fn unsubscribe(&mut self, token: SubscriptionToken);
}

/// A single cancellable one-shot wakeup on the control thread.
///
/// When it elapses the host calls `FocusCoordinator::fire_timer`.
pub trait DeferredExecutor {
    /// Arm the wakeup, replacing any armed one.
    fn arm(&mut self, delay: Duration);
    fn disarm(&mut self);
}

pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall-clock `Clock` backed by `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
