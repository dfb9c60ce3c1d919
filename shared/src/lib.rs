// FocusDim core: dims every display except the focused window(s).
//
// Platform-neutral. The macOS host supplies the window, display, surface,
// event and timer services through the traits in `platform`.

pub mod config;
pub mod coordinator;
pub mod display;
pub mod errors;
pub mod events;
pub mod geometry;
pub mod logging;
pub mod overlay;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod window;

pub use config::{AppConfig, FocusConfiguration, FocusMode};
pub use coordinator::{FocusCoordinator, Platform};
pub use display::{DisplayDescriptor, DisplayId};
pub use errors::{ConfigError, DimmerError, ObserverError};
pub use events::{AxNotification, Pid, SubscriptionToken, SystemEvent, Topic};
pub use window::{WindowId, WindowSnapshot};
