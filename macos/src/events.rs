// OS notifications and the pointer monitor, turned into `SystemEvent`s.
//
// Workspace notifications (activation, deactivation, Space changes) come
// from NSWorkspace's own center; screen parameter changes from the default
// center. Both are posted on the main thread. The pointer feed is an NSEvent
// global monitor, installed only while something subscribes to it.
//
// System-UI enter/exit has no public notification on these centers, so that
// topic is a bookkeeping entry: the Dock watch in `accessibility` reports
// Mission Control and App Exposé through `app::system_ui_changed`.

use std::collections::HashMap;
use std::ptr::NonNull;

use block2::RcBlock;
use focusdim_shared::events::{Pid, SubscriptionToken, SystemEvent, Topic};
use focusdim_shared::platform::EventSource;
use kurbo::Point;
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, ProtocolObject};
use objc2::MainThreadMarker;
use objc2_app_kit::{
    NSApplicationDidChangeScreenParametersNotification, NSEvent, NSEventMask,
    NSRunningApplication, NSWorkspace, NSWorkspaceActiveSpaceDidChangeNotification,
    NSWorkspaceApplicationKey, NSWorkspaceDidActivateApplicationNotification,
    NSWorkspaceDidDeactivateApplicationNotification,
};
use objc2_foundation::{NSNotification, NSNotificationCenter, NSNotificationName, NSObjectProtocol};
use tracing::{debug, warn};

use crate::{app, screens};

enum Registration {
    Notification {
        center: Retained<NSNotificationCenter>,
        observer: Retained<ProtocolObject<dyn NSObjectProtocol>>,
    },
    Monitor(Retained<AnyObject>),
    Signal,
}

pub struct SystemEvents {
    mtm: MainThreadMarker,
    next_token: u64,
    live: HashMap<SubscriptionToken, Registration>,
}

impl SystemEvents {
    pub fn new(mtm: MainThreadMarker) -> Self {
        Self {
            mtm,
            next_token: 0,
            live: HashMap::new(),
        }
    }

    fn register(&mut self, topic: Topic) -> Option<Registration> {
        let registration = match topic {
            Topic::ApplicationActivated => workspace_observer(
                unsafe { NSWorkspaceDidActivateApplicationNotification },
                |pid| SystemEvent::ApplicationActivated { pid },
            ),
            Topic::ApplicationDeactivated => workspace_observer(
                unsafe { NSWorkspaceDidDeactivateApplicationNotification },
                |pid| SystemEvent::ApplicationDeactivated { pid },
            ),
            Topic::ActiveSpaceChanged => workspace_observer(
                unsafe { NSWorkspaceActiveSpaceDidChangeNotification },
                |_| SystemEvent::ActiveSpaceChanged,
            ),
            Topic::ScreenParametersChanged => {
                let center = NSNotificationCenter::defaultCenter();
                let block = RcBlock::new(|_note: NonNull<NSNotification>| {
                    app::dispatch(SystemEvent::ScreenParametersChanged);
                });
                let observer = unsafe {
                    center.addObserverForName_object_queue_usingBlock(
                        Some(NSApplicationDidChangeScreenParametersNotification),
                        None,
                        None,
                        &block,
                    )
                };
                Registration::Notification { center, observer }
            }
            Topic::PointerMoved => {
                let mtm = self.mtm;
                let handler = RcBlock::new(move |_event: NonNull<NSEvent>| {
                    let location = NSEvent::mouseLocation();
                    let top = screens::primary_height(mtm) - location.y;
                    app::dispatch(SystemEvent::PointerMoved {
                        location: Point::new(location.x, top),
                    });
                });
                let monitor =
                    NSEvent::addGlobalMonitorForEventsMatchingMask_handler(NSEventMask::MouseMoved, &handler)?;
                Registration::Monitor(monitor)
            }
            Topic::SystemUi | Topic::Accessibility => Registration::Signal,
        };
        Some(registration)
    }
}

/// Observe a workspace notification, passing along the pid of the
/// application it concerns (0 when absent).
fn workspace_observer(
    name: &'static NSNotificationName,
    event: fn(Pid) -> SystemEvent,
) -> Registration {
    let center = NSWorkspace::sharedWorkspace().notificationCenter();
    let block = RcBlock::new(move |note: NonNull<NSNotification>| {
        let note = unsafe { note.as_ref() };
        app::dispatch(event(notified_pid(note).unwrap_or_default()));
    });
    let observer =
        unsafe { center.addObserverForName_object_queue_usingBlock(Some(name), None, None, &block) };
    Registration::Notification { center, observer }
}

fn notified_pid(note: &NSNotification) -> Option<Pid> {
    let info = note.userInfo()?;
    let value = info.objectForKey(unsafe { NSWorkspaceApplicationKey })?;
    let app = value.downcast::<NSRunningApplication>().ok()?;
    Some(app.processIdentifier())
}

impl EventSource for SystemEvents {
    fn subscribe(&mut self, topic: Topic) -> Option<SubscriptionToken> {
        let Some(registration) = self.register(topic) else {
            warn!(event = "focus.events.register_failed", topic = ?topic);
            return None;
        };
        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        self.live.insert(token, registration);
        debug!(event = "focus.events.subscribed", topic = ?topic, token = token.0);
        Some(token)
    }

    fn unsubscribe(&mut self, token: SubscriptionToken) {
        match self.live.remove(&token) {
            Some(Registration::Notification { center, observer }) => unsafe {
                center.removeObserver(observer.as_ref());
            },
            Some(Registration::Monitor(monitor)) => unsafe {
                NSEvent::removeMonitor(&monitor);
            },
            Some(Registration::Signal) | None => {}
        }
    }
}

impl Drop for SystemEvents {
    fn drop(&mut self) {
        let tokens: Vec<SubscriptionToken> = self.live.keys().copied().collect();
        for token in tokens {
            self.unsubscribe(token);
        }
    }
}
