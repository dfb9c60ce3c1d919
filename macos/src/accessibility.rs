// Window introspection over the macOS Accessibility API.
//
// Every query is synchronous and bounded by a short messaging timeout on
// the system-wide element, because a hung application would otherwise stall
// the main thread. Failures of any kind come back as `None`.
//
// Observers are keyed by pid. The C callbacks receive the pid through their
// refcon and push a typed event onto the host queue; they never touch the
// coordinator or this struct directly.
//
// Mission Control and App Exposé have no public notification. The Dock
// posts private `AXExpose*` notifications on its application element, which
// `DockWatcher` turns into system-UI enter/exit signals.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;

use accessibility_sys::{
    kAXErrorSuccess, kAXFocusedWindowAttribute, kAXParentAttribute, kAXPositionAttribute,
    kAXRoleAttribute, kAXSizeAttribute, kAXSubroleAttribute, kAXTrustedCheckOptionPrompt,
    kAXValueTypeCGPoint, kAXValueTypeCGSize, kAXWindowsAttribute, AXError, AXIsProcessTrusted,
    AXIsProcessTrustedWithOptions, AXObserverAddNotification, AXObserverCallback,
    AXObserverCreate, AXObserverGetRunLoopSource, AXObserverRef, AXObserverRemoveNotification,
    AXUIElementCopyAttributeValue, AXUIElementCopyElementAtPosition, AXUIElementCreateApplication,
    AXUIElementCreateSystemWide, AXUIElementGetPid, AXUIElementGetTypeID, AXUIElementRef,
    AXUIElementSetMessagingTimeout, AXValueGetValue, AXValueRef,
};
use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopSource};
use core_foundation::string::{CFString, CFStringRef};
use core_graphics::event::CGEvent;
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use core_graphics::geometry::{CGPoint, CGSize};
use focusdim_shared::errors::ObserverError;
use focusdim_shared::events::{AxNotification, Pid, SystemEvent};
use focusdim_shared::platform::{RunningApp, WindowIntrospection};
use kurbo::{Point, Rect};
use objc2_app_kit::{NSRunningApplication, NSWorkspace};
use objc2_foundation::NSString;
use tracing::{debug, info};

use crate::app;

/// Upper bound for a single accessibility round trip, in seconds.
const MESSAGING_TIMEOUT: f32 = 0.25;

const DOCK_BUNDLE_ID: &str = "com.apple.dock";

/// Dock notifications posted when an overview UI takes the screen.
const EXPOSE_ENTERED: [&str; 3] = [
    "AXExposeShowAllWindows",
    "AXExposeShowFrontWindows",
    "AXExposeShowDesktop",
];
const EXPOSE_EXITED: &str = "AXExposeExit";

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    // Private, but the only way from an AX window to its CGWindowID.
    fn _AXUIElementGetWindow(element: AXUIElementRef, window: *mut u32) -> AXError;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFHash(cf: CFTypeRef) -> usize;
}

// ── Elements ────────────────────────────────────────────────────────────────

/// Retained AXUIElement.
#[derive(Clone)]
pub struct AxElement(CFType);

impl AxElement {
    /// Take ownership of a +1 reference; `None` for null.
    unsafe fn from_create_rule(element: AXUIElementRef) -> Option<Self> {
        if element.is_null() {
            return None;
        }
        Some(Self(CFType::wrap_under_create_rule(element as CFTypeRef)))
    }

    fn as_ptr(&self) -> AXUIElementRef {
        self.0.as_CFTypeRef() as AXUIElementRef
    }
}

fn copy_attribute(element: &AxElement, attribute: &str) -> Option<CFType> {
    let name = CFString::new(attribute);
    let mut value: CFTypeRef = ptr::null();
    // SAFETY: Copy Rule; on success `value` is +1 retained and owned below.
    let result =
        unsafe { AXUIElementCopyAttributeValue(element.as_ptr(), name.as_concrete_TypeRef(), &mut value) };
    if result != kAXErrorSuccess || value.is_null() {
        return None;
    }
    Some(unsafe { CFType::wrap_under_create_rule(value) })
}

fn string_attribute(element: &AxElement, attribute: &str) -> Option<String> {
    copy_attribute(element, attribute)?
        .downcast::<CFString>()
        .map(|s| s.to_string())
}

fn element_attribute(element: &AxElement, attribute: &str) -> Option<AxElement> {
    let value = copy_attribute(element, attribute)?;
    // SAFETY: type id lookup has no preconditions.
    (value.type_of() == unsafe { AXUIElementGetTypeID() }).then_some(AxElement(value))
}

fn point_attribute(element: &AxElement, attribute: &str) -> Option<CGPoint> {
    let value = copy_attribute(element, attribute)?;
    let mut point = CGPoint::new(0.0, 0.0);
    // SAFETY: AXValueGetValue checks the stored type before writing.
    let ok = unsafe {
        AXValueGetValue(
            value.as_CFTypeRef() as AXValueRef,
            kAXValueTypeCGPoint,
            &mut point as *mut CGPoint as *mut c_void,
        )
    };
    ok.then_some(point)
}

fn size_attribute(element: &AxElement, attribute: &str) -> Option<CGSize> {
    let value = copy_attribute(element, attribute)?;
    let mut size = CGSize::new(0.0, 0.0);
    // SAFETY: as above.
    let ok = unsafe {
        AXValueGetValue(
            value.as_CFTypeRef() as AXValueRef,
            kAXValueTypeCGSize,
            &mut size as *mut CGSize as *mut c_void,
        )
    };
    ok.then_some(size)
}

fn application_element(pid: Pid) -> Option<AxElement> {
    // SAFETY: Create Rule.
    unsafe { AxElement::from_create_rule(AXUIElementCreateApplication(pid)) }
}

fn bundle_id_for_pid(pid: Pid) -> Option<String> {
    let app = NSRunningApplication::runningApplicationWithProcessIdentifier(pid)?;
    app.bundleIdentifier().map(|id| id.to_string())
}

// ── Permission ──────────────────────────────────────────────────────────────

/// Ask for the accessibility permission, showing the system prompt if it
/// has not been granted yet.
pub fn request_permission() -> bool {
    // SAFETY: reading an immutable framework constant.
    let key = unsafe { CFString::wrap_under_get_rule(kAXTrustedCheckOptionPrompt) };
    let options = CFDictionary::from_CFType_pairs(&[(key, CFBoolean::true_value())]);
    // SAFETY: `options` outlives the call.
    let trusted = unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) };
    info!(event = "focus.accessibility.permission_checked", trusted);
    trusted
}

pub fn is_trusted() -> bool {
    unsafe { AXIsProcessTrusted() }
}

// ── Observers ───────────────────────────────────────────────────────────────

/// An `AXObserver` on one application, attached to the main run loop until
/// dropped.
struct Observer {
    pid: Pid,
    observer: CFType,
    application: AxElement,
    source: CFRunLoopSource,
    notifications: Vec<CFString>,
}

impl Observer {
    /// Register `names` on the application element of `pid`. Succeeds when
    /// at least one notification is accepted; the callback's refcon is the pid.
    fn install(pid: Pid, callback: AXObserverCallback, names: &[&str]) -> Result<Self, ObserverError> {
        let application =
            application_element(pid).ok_or(ObserverError::ObserverCreateFailed { pid })?;

        let mut raw: AXObserverRef = ptr::null_mut();
        // SAFETY: Create Rule on success.
        let result = unsafe { AXObserverCreate(pid, callback, &mut raw) };
        if result != kAXErrorSuccess || raw.is_null() {
            return Err(ObserverError::ObserverCreateFailed { pid });
        }
        let observer = unsafe { CFType::wrap_under_create_rule(raw as CFTypeRef) };

        let refcon = pid as isize as *mut c_void;
        let mut notifications = Vec::new();
        let mut rejected = None;
        for &name in names {
            let cf_name = CFString::new(name);
            let result = unsafe {
                AXObserverAddNotification(raw, application.as_ptr(), cf_name.as_concrete_TypeRef(), refcon)
            };
            if result == kAXErrorSuccess {
                notifications.push(cf_name);
            } else {
                debug!(
                    event = "focus.accessibility.notification_rejected",
                    pid,
                    notification = name,
                    ax_error = result
                );
                rejected.get_or_insert(name);
            }
        }
        if notifications.is_empty() {
            let notification = rejected.unwrap_or_default().to_string();
            return Err(ObserverError::NotificationRejected { pid, notification });
        }

        // SAFETY: Get Rule; the observer keeps the source alive.
        let source = unsafe { CFRunLoopSource::wrap_under_get_rule(AXObserverGetRunLoopSource(raw)) };
        CFRunLoop::get_main().add_source(&source, unsafe { kCFRunLoopDefaultMode });

        Ok(Self {
            pid,
            observer,
            application,
            source,
            notifications,
        })
    }

    fn as_ptr(&self) -> AXObserverRef {
        self.observer.as_CFTypeRef() as AXObserverRef
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        for name in &self.notifications {
            let result = unsafe {
                AXObserverRemoveNotification(self.as_ptr(), self.application.as_ptr(), name.as_concrete_TypeRef())
            };
            if result != kAXErrorSuccess {
                // The process is usually gone already.
                debug!(event = "focus.accessibility.remove_notification_failed", pid = self.pid, ax_error = result);
            }
        }
        CFRunLoop::get_main().remove_source(&self.source, unsafe { kCFRunLoopDefaultMode });
    }
}

unsafe extern "C" fn observer_callback(
    _observer: AXObserverRef,
    _element: AXUIElementRef,
    notification: CFStringRef,
    refcon: *mut c_void,
) {
    if notification.is_null() {
        return;
    }
    let name = CFString::wrap_under_get_rule(notification).to_string();
    let Some(notification) = AxNotification::from_name(&name) else {
        return;
    };
    let pid = refcon as isize as Pid;
    app::dispatch(SystemEvent::Accessibility { pid, notification });
}

// ── System UI ───────────────────────────────────────────────────────────────

pub fn dock_pid() -> Option<Pid> {
    let bundle_id = NSString::from_str(DOCK_BUNDLE_ID);
    let apps = NSRunningApplication::runningApplicationsWithBundleIdentifier(&bundle_id);
    apps.firstObject().map(|app| app.processIdentifier())
}

/// Reports Mission Control and App Exposé through `app::system_ui_changed`.
pub struct DockWatcher {
    _observer: Observer,
}

impl DockWatcher {
    pub fn install(dock_pid: Pid) -> Result<Self, ObserverError> {
        if !is_trusted() {
            return Err(ObserverError::PermissionDenied);
        }
        let mut names = EXPOSE_ENTERED.to_vec();
        names.push(EXPOSE_EXITED);
        let observer = Observer::install(dock_pid, dock_callback, &names)?;
        info!(
            event = "focus.accessibility.dock_watch_installed",
            pid = dock_pid,
            notifications = observer.notifications.len()
        );
        Ok(Self { _observer: observer })
    }
}

unsafe extern "C" fn dock_callback(
    _observer: AXObserverRef,
    _element: AXUIElementRef,
    notification: CFStringRef,
    _refcon: *mut c_void,
) {
    if notification.is_null() {
        return;
    }
    let name = CFString::wrap_under_get_rule(notification).to_string();
    if let Some(entered) = expose_transition(&name) {
        app::system_ui_changed(entered);
    }
}

/// `Some(true)` when an overview opens, `Some(false)` when it closes.
fn expose_transition(name: &str) -> Option<bool> {
    if name == EXPOSE_EXITED {
        Some(false)
    } else if EXPOSE_ENTERED.contains(&name) {
        Some(true)
    } else {
        None
    }
}

// ── Introspection ───────────────────────────────────────────────────────────

pub struct Accessibility {
    system_wide: Option<AxElement>,
    observers: HashMap<Pid, Observer>,
}

impl Accessibility {
    pub fn new() -> Self {
        // SAFETY: Create Rule.
        let system_wide = unsafe { AxElement::from_create_rule(AXUIElementCreateSystemWide()) };
        if let Some(element) = &system_wide {
            // Applies to every element of this process that has no own timeout.
            unsafe { AXUIElementSetMessagingTimeout(element.as_ptr(), MESSAGING_TIMEOUT) };
        }
        Self {
            system_wide,
            observers: HashMap::new(),
        }
    }

    fn frontmost_pid(&self) -> Option<Pid> {
        self.frontmost_application().map(|app| app.pid)
    }
}

impl WindowIntrospection for Accessibility {
    type Element = AxElement;

    fn is_trusted(&self) -> bool {
        is_trusted()
    }

    fn frontmost_application(&self) -> Option<RunningApp> {
        let app = NSWorkspace::sharedWorkspace().frontmostApplication()?;
        Some(RunningApp {
            pid: app.processIdentifier(),
            bundle_id: app.bundleIdentifier().map(|id| id.to_string()),
        })
    }

    fn windows(&self, pid: Pid) -> Vec<AxElement> {
        let Some(app) = application_element(pid) else {
            return Vec::new();
        };
        let Some(value) = copy_attribute(&app, kAXWindowsAttribute) else {
            return Vec::new();
        };
        // SAFETY: the windows attribute is a CFArray; retain it for the
        // lifetime of `array` and release `value` separately.
        let array: CFArray<CFType> =
            unsafe { CFArray::wrap_under_get_rule(value.as_CFTypeRef() as CFArrayRef) };
        array
            .iter()
            .filter(|item| item.type_of() == unsafe { AXUIElementGetTypeID() })
            .map(|item| AxElement((*item).clone()))
            .collect()
    }

    fn focused_window(&self, pid: Pid) -> Option<AxElement> {
        let app = application_element(pid)?;
        element_attribute(&app, kAXFocusedWindowAttribute)
    }

    fn element_at(&self, point: Point) -> Option<AxElement> {
        let system_wide = self.system_wide.as_ref()?;
        let mut element: AXUIElementRef = ptr::null_mut();
        // SAFETY: Copy Rule on success.
        let result = unsafe {
            AXUIElementCopyElementAtPosition(
                system_wide.as_ptr(),
                point.x as f32,
                point.y as f32,
                &mut element,
            )
        };
        if result != kAXErrorSuccess {
            return None;
        }
        unsafe { AxElement::from_create_rule(element) }
    }

    fn pointer_location(&self) -> Option<Point> {
        // CGEvent locations are already top-left global, like AX frames.
        let source = CGEventSource::new(CGEventSourceStateID::CombinedSessionState).ok()?;
        let event = CGEvent::new(source).ok()?;
        let location = event.location();
        Some(Point::new(location.x, location.y))
    }

    fn role(&self, element: &AxElement) -> Option<String> {
        string_attribute(element, kAXRoleAttribute)
    }

    fn subrole(&self, element: &AxElement) -> Option<String> {
        string_attribute(element, kAXSubroleAttribute)
    }

    fn frame(&self, element: &AxElement) -> Option<Rect> {
        let origin = point_attribute(element, kAXPositionAttribute)?;
        let size = size_attribute(element, kAXSizeAttribute)?;
        Some(Rect::from_origin_size(
            (origin.x, origin.y),
            (size.width, size.height),
        ))
    }

    fn bundle_id(&self, element: &AxElement) -> Option<String> {
        bundle_id_for_pid(self.pid(element)?)
    }

    fn pid(&self, element: &AxElement) -> Option<Pid> {
        let mut pid: Pid = 0;
        let result = unsafe { AXUIElementGetPid(element.as_ptr(), &mut pid) };
        (result == kAXErrorSuccess && pid > 0).then_some(pid)
    }

    fn parent(&self, element: &AxElement) -> Option<AxElement> {
        element_attribute(element, kAXParentAttribute)
    }

    /// Remote panels have no modal-parent attribute. One owned by another
    /// process is taken to be modal for the frontmost app's focused window.
    fn modal_parent(&self, element: &AxElement) -> Option<AxElement> {
        let frontmost = self.frontmost_pid()?;
        if self.pid(element)? == frontmost {
            return None;
        }
        self.focused_window(frontmost)
    }

    fn window_number(&self, element: &AxElement) -> Option<u32> {
        let mut number = 0u32;
        // SAFETY: writes a single CGWindowID on success.
        let result = unsafe { _AXUIElementGetWindow(element.as_ptr(), &mut number) };
        (result == kAXErrorSuccess && number != 0).then_some(number)
    }

    fn element_identity(&self, element: &AxElement) -> u64 {
        // SAFETY: element is a live CF object.
        unsafe { CFHash(element.0.as_CFTypeRef()) as u64 }
    }

    fn observe_application(&mut self, pid: Pid) -> Result<(), ObserverError> {
        if !is_trusted() {
            return Err(ObserverError::PermissionDenied);
        }
        if self.observers.contains_key(&pid) {
            return Ok(());
        }
        let names: Vec<&str> = AxNotification::ALL.iter().map(|n| n.name()).collect();
        let observer = Observer::install(pid, observer_callback, &names)?;
        debug!(
            event = "focus.accessibility.observer_installed",
            pid,
            notifications = observer.notifications.len()
        );
        self.observers.insert(pid, observer);
        Ok(())
    }

    fn unobserve_application(&mut self, pid: Pid) {
        if self.observers.remove(&pid).is_some() {
            debug!(event = "focus.accessibility.observer_removed", pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_notifications_map_to_system_ui() {
        assert_eq!(expose_transition("AXExposeShowAllWindows"), Some(true));
        assert_eq!(expose_transition("AXExposeShowFrontWindows"), Some(true));
        assert_eq!(expose_transition("AXExposeShowDesktop"), Some(true));
        assert_eq!(expose_transition("AXExposeExit"), Some(false));
    }

    #[test]
    fn test_other_dock_notifications_are_ignored() {
        assert_eq!(expose_transition("AXFocusedWindowChanged"), None);
        assert_eq!(expose_transition(""), None);
    }
}
