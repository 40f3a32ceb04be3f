/// Result alias that carries the custom [`AtmoError`] type.
pub type Result<T> = std::result::Result<T, AtmoError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AtmoError {
    /// Bad or missing parameter, unknown driver interface version or an
    /// otherwise unusable configuration.
    #[error("{0}")]
    Configuration(String),
    /// Failure reported by a lighting driver while opening, closing or
    /// writing to its device.
    #[error("{0}")]
    Driver(String),
    /// A single capture cycle failed. Never escalated by the schedulers.
    #[error("capture failed: {0}")]
    Capture(String),
    /// Internal condition such as a poisoned lock.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Persisted settings could not be (de)serialised.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl AtmoError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn configuration<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn driver<T: Into<String>>(msg: T) -> Self {
        Self::Driver(msg.into())
    }

    pub fn is_driver_error(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<&str> for AtmoError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AtmoError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Locks a shared value, turning poisoning into an [`AtmoError`].
pub(crate) fn lock<'a, T: ?Sized>(
    mutex: &'a std::sync::Mutex<T>,
    what: &str,
) -> Result<std::sync::MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| AtmoError::msg(format!("{what} has been poisoned")))
}
