use std::error::Error;

/// Common behaviour of every error this crate can produce.
pub trait DimmerError: Error + Send + Sync + 'static {
    /// Stable code for structured logs.
    fn error_code(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error on config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize config: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

impl DimmerError for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "CONFIG_IO_ERROR",
            ConfigError::Parse { .. } => "CONFIG_PARSE_ERROR",
            ConfigError::Serialize { .. } => "CONFIG_SERIALIZE_ERROR",
        }
    }
}

/// Failure to watch an application's window notifications.
///
/// Never fatal: refreshes keep arriving through workspace events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserverError {
    #[error("Accessibility permission has not been granted")]
    PermissionDenied,

    #[error("Could not create an accessibility observer for pid {pid}")]
    ObserverCreateFailed { pid: i32 },

    #[error("Application {pid} rejected notification '{notification}'")]
    NotificationRejected { pid: i32, notification: String },
}

impl DimmerError for ObserverError {
    fn error_code(&self) -> &'static str {
        match self {
            ObserverError::PermissionDenied => "OBSERVER_PERMISSION_DENIED",
            ObserverError::ObserverCreateFailed { .. } => "OBSERVER_CREATE_FAILED",
            ObserverError::NotificationRejected { .. } => "OBSERVER_NOTIFICATION_REJECTED",
        }
    }
}
