// Typed OS events and the bookkeeping around their subscriptions.
//
// Platform callbacks never hold a reference to the coordinator. They turn
// whatever the OS hands them into a `SystemEvent` and the host feeds it to
// `FocusCoordinator::handle_event` on the control thread. Subscriptions are
// plain tokens collected in a `SubscriptionSet` and released together.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use kurbo::Point;

/// Process identifier of a running application.
pub type Pid = i32;

/// Event families a host can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    ApplicationActivated,
    ApplicationDeactivated,
    ActiveSpaceChanged,
    ScreenParametersChanged,
    /// Paired enter/exit signals for system overview UIs.
    SystemUi,
    /// Global pointer movement; only subscribed while following the mouse.
    PointerMoved,
    /// Per-application window notifications from installed observers.
    Accessibility,
}

/// Window notifications an application observer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxNotification {
    FocusedWindowChanged,
    MainWindowChanged,
    WindowCreated,
    WindowMoved,
    WindowResized,
    WindowMinimized,
    WindowDeminiaturized,
    UiElementDestroyed,
}

impl AxNotification {
    pub const ALL: [AxNotification; 8] = [
        AxNotification::FocusedWindowChanged,
        AxNotification::MainWindowChanged,
        AxNotification::WindowCreated,
        AxNotification::WindowMoved,
        AxNotification::WindowResized,
        AxNotification::WindowMinimized,
        AxNotification::WindowDeminiaturized,
        AxNotification::UiElementDestroyed,
    ];

    /// Accessibility API name of the notification.
    pub fn name(self) -> &'static str {
        match self {
            AxNotification::FocusedWindowChanged => "AXFocusedWindowChanged",
            AxNotification::MainWindowChanged => "AXMainWindowChanged",
            AxNotification::WindowCreated => "AXWindowCreated",
            AxNotification::WindowMoved => "AXWindowMoved",
            AxNotification::WindowResized => "AXWindowResized",
            AxNotification::WindowMinimized => "AXWindowMiniaturized",
            AxNotification::WindowDeminiaturized => "AXWindowDeminiaturized",
            AxNotification::UiElementDestroyed => "AXUIElementDestroyed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    ApplicationActivated { pid: Pid },
    ApplicationDeactivated { pid: Pid },
    ActiveSpaceChanged,
    ScreenParametersChanged,
    SystemUiEntered,
    SystemUiExited,
    PointerMoved { location: Point },
    Accessibility { pid: Pid, notification: AxNotification },
}

impl SystemEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SystemEvent::ApplicationActivated { .. } => Topic::ApplicationActivated,
            SystemEvent::ApplicationDeactivated { .. } => Topic::ApplicationDeactivated,
            SystemEvent::ActiveSpaceChanged => Topic::ActiveSpaceChanged,
            SystemEvent::ScreenParametersChanged => Topic::ScreenParametersChanged,
            SystemEvent::SystemUiEntered | SystemEvent::SystemUiExited => Topic::SystemUi,
            SystemEvent::PointerMoved { .. } => Topic::PointerMoved,
            SystemEvent::Accessibility { .. } => Topic::Accessibility,
        }
    }
}

/// Handle returned by an `EventSource` for one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

/// Live subscriptions, released en masse on stop.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    tokens: BTreeMap<SubscriptionToken, Topic>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: SubscriptionToken, topic: Topic) {
        self.tokens.insert(token, topic);
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.tokens.values().any(|t| *t == topic)
    }

    /// Remove and return every token for `topic`.
    pub fn take_topic(&mut self, topic: Topic) -> Vec<SubscriptionToken> {
        let tokens: Vec<_> = self
            .tokens
            .iter()
            .filter(|(_, t)| **t == topic)
            .map(|(token, _)| *token)
            .collect();
        for token in &tokens {
            self.tokens.remove(token);
        }
        tokens
    }

    /// Remove and return every token.
    pub fn take_all(&mut self) -> Vec<SubscriptionToken> {
        std::mem::take(&mut self.tokens).into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// What the coordinator knows about an application it is observing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverHandler {
    pub bundle_id: Option<String>,
    pub installed_at: Instant,
}

/// Registration table from process id to observer handler.
///
/// Accessibility events are dispatched only for pids present here; a late
/// notification from an application that is no longer observed is ignored.
#[derive(Debug, Default)]
pub struct ObserverTable {
    handlers: HashMap<Pid, ObserverHandler>,
}

impl ObserverTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pid: Pid, handler: ObserverHandler) -> Option<ObserverHandler> {
        self.handlers.insert(pid, handler)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<ObserverHandler> {
        self.handlers.remove(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.handlers.contains_key(&pid)
    }

    /// Remove every entry, returning the pids that were registered.
    pub fn drain_pids(&mut self) -> Vec<Pid> {
        self.handlers.drain().map(|(pid, _)| pid).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
