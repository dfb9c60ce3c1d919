// macOS application lifecycle: NSApplication setup, the coordinator and
// the main-thread delivery queue.
//
// The coordinator lives in a main-thread `thread_local!`. Every callback
// (notifications, the pointer monitor, AX observers, timers) pushes onto a
// queue and drains it; a callback that fires while the coordinator is
// already borrowed leaves its delivery for the outer call to drain.
//
// The permission poll also keeps the Dock watch current: it needs the
// accessibility permission, and the Dock comes back with a new pid after
// it relaunches.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ptr::NonNull;

use block2::RcBlock;
use focusdim_shared::config;
use focusdim_shared::coordinator::{FocusCoordinator, Platform};
use focusdim_shared::errors::DimmerError;
use focusdim_shared::events::{Pid, SystemEvent};
use focusdim_shared::platform::SystemClock;
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2::{define_class, msg_send, MainThreadMarker, MainThreadOnly};
use objc2_app_kit::{NSApplication, NSApplicationActivationPolicy, NSApplicationDelegate};
use objc2_foundation::{NSNotification, NSObject, NSObjectProtocol, NSTimer};
use tracing::{error, info, warn};

use crate::accessibility::{self, Accessibility, DockWatcher};
use crate::events::SystemEvents;
use crate::overlay::OverlayFactory;
use crate::screens::ScreenEnumerator;
use crate::timer::RefreshTimer;

/// How often to look for a change in the accessibility permission, seconds.
const PERMISSION_POLL_INTERVAL: f64 = 2.0;

enum Delivery {
    Event(SystemEvent),
    Timer,
    PermissionChanged,
}

thread_local! {
    static COORDINATOR: RefCell<Option<FocusCoordinator<Accessibility>>> = const { RefCell::new(None) };
    static PENDING: RefCell<VecDeque<Delivery>> = const { RefCell::new(VecDeque::new()) };
    static PERMISSION_POLL: RefCell<Option<Retained<NSTimer>>> = const { RefCell::new(None) };
    static LAST_TRUSTED: Cell<bool> = const { Cell::new(false) };
    static DOCK_WATCHER: RefCell<Option<DockWatcher>> = const { RefCell::new(None) };
    /// Dock pid of the last install attempt, successful or not.
    static DOCK_ATTEMPTED: Cell<Option<Pid>> = const { Cell::new(None) };
}

// ── Delivery ────────────────────────────────────────────────────────────────

/// Deliver an OS event to the coordinator on the main thread.
pub fn dispatch(event: SystemEvent) {
    enqueue(Delivery::Event(event));
}

/// Called by the refresh timer.
pub fn fire_timer() {
    enqueue(Delivery::Timer);
}

/// Called by the Dock watch when Mission Control or App Exposé opens or closes.
pub fn system_ui_changed(entered: bool) {
    dispatch(if entered {
        SystemEvent::SystemUiEntered
    } else {
        SystemEvent::SystemUiExited
    });
}

fn enqueue(delivery: Delivery) {
    PENDING.with(|queue| queue.borrow_mut().push_back(delivery));
    drain();
}

fn drain() {
    COORDINATOR.with(|cell| {
        // Busy: the call holding the borrow drains when it returns.
        let Ok(mut slot) = cell.try_borrow_mut() else {
            return;
        };
        let Some(coordinator) = slot.as_mut() else {
            PENDING.with(|queue| queue.borrow_mut().clear());
            return;
        };
        while let Some(delivery) = PENDING.with(|queue| queue.borrow_mut().pop_front()) {
            match delivery {
                Delivery::Event(event) => coordinator.handle_event(event),
                Delivery::Timer => coordinator.fire_timer(),
                Delivery::PermissionChanged => coordinator.request_refresh(true),
            }
        }
    });
}

fn with_coordinator(f: impl FnOnce(&mut FocusCoordinator<Accessibility>)) {
    COORDINATOR.with(|cell| {
        if let Some(coordinator) = cell.borrow_mut().as_mut() {
            f(coordinator);
        }
    });
    drain();
}

// ── Launch ──────────────────────────────────────────────────────────────────

fn launch(mtm: MainThreadMarker) {
    let settings = config::load_config();
    let trusted = accessibility::request_permission();
    LAST_TRUSTED.with(|last| last.set(trusted));

    let platform = Platform {
        introspection: Accessibility::new(),
        displays: Box::new(ScreenEnumerator::new(mtm)),
        surfaces: Box::new(OverlayFactory::new(mtm)),
        events: Box::new(SystemEvents::new(mtm)),
        timer: Box::new(RefreshTimer::new()),
        clock: Box::new(SystemClock),
    };
    let coordinator = FocusCoordinator::new(platform, &settings);
    COORDINATOR.with(|cell| *cell.borrow_mut() = Some(coordinator));

    with_coordinator(|coordinator| coordinator.start());
    ensure_dock_watch();
    start_permission_poll();

    info!(
        event = "focus.app.launched",
        enabled = settings.is_enabled,
        intensity = settings.intensity,
        trusted
    );
}

/// Refresh as soon as the accessibility permission flips.
fn start_permission_poll() {
    let block = RcBlock::new(|_timer: NonNull<NSTimer>| {
        let trusted = accessibility::is_trusted();
        let changed = LAST_TRUSTED.with(|last| last.replace(trusted) != trusted);
        if changed {
            info!(event = "focus.app.permission_changed", trusted);
            DOCK_ATTEMPTED.with(|attempted| attempted.set(None));
            enqueue(Delivery::PermissionChanged);
        }
        ensure_dock_watch();
    });
    let timer = unsafe {
        NSTimer::scheduledTimerWithTimeInterval_repeats_block(PERMISSION_POLL_INTERVAL, true, &block)
    };
    PERMISSION_POLL.with(|slot| *slot.borrow_mut() = Some(timer));
}

/// Watch the running Dock for overview UIs, once per Dock pid.
fn ensure_dock_watch() {
    if !accessibility::is_trusted() {
        return;
    }
    let Some(pid) = accessibility::dock_pid() else {
        return;
    };
    if DOCK_ATTEMPTED.with(|attempted| attempted.replace(Some(pid))) == Some(pid) {
        return;
    }
    let watcher = match DockWatcher::install(pid) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(
                event = "focus.app.dock_watch_failed",
                pid,
                error_code = e.error_code(),
                error = %e
            );
            None
        }
    };
    DOCK_WATCHER.with(|slot| *slot.borrow_mut() = watcher);
}

fn shutdown() {
    PERMISSION_POLL.with(|slot| {
        if let Some(timer) = slot.borrow_mut().take() {
            timer.invalidate();
        }
    });
    DOCK_WATCHER.with(|slot| slot.borrow_mut().take());
    with_coordinator(|coordinator| coordinator.stop());
    COORDINATOR.with(|cell| cell.borrow_mut().take());
    info!(event = "focus.app.terminated");
}

define_class!(
    #[unsafe(super(NSObject))]
    #[name = "FocusDimAppDelegate"]
    #[thread_kind = MainThreadOnly]
    struct AppDelegate;

    unsafe impl NSObjectProtocol for AppDelegate {}

    unsafe impl NSApplicationDelegate for AppDelegate {
        #[unsafe(method(applicationDidFinishLaunching:))]
        fn did_finish_launching(&self, _notification: &NSNotification) {
            let mtm = MainThreadMarker::from(self);
            launch(mtm);
        }

        #[unsafe(method(applicationWillTerminate:))]
        fn will_terminate(&self, _notification: &NSNotification) {
            shutdown();
        }
    }
);

impl AppDelegate {
    fn new(mtm: MainThreadMarker) -> Retained<Self> {
        let this = mtm.alloc::<Self>();
        unsafe { msg_send![super(this), init] }
    }
}

pub fn run() {
    let Some(mtm) = MainThreadMarker::new() else {
        error!(event = "focus.app.not_main_thread");
        std::process::exit(1);
    };

    let app = NSApplication::sharedApplication(mtm);
    app.setActivationPolicy(NSApplicationActivationPolicy::Accessory);

    let delegate = AppDelegate::new(mtm);
    let delegate_proto = ProtocolObject::from_ref(&*delegate);
    app.setDelegate(Some(delegate_proto));

    unsafe { app.run() };
}
