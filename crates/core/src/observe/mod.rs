//! Process-wide observability state shared by every pipeline component.
//!
//! The log level persisted in the settings is applied here rather than to the
//! driver. Components receive an [`Observer`] when they are built and never
//! reach for ambient globals; the service initialises it at startup and tears
//! it down when the pipeline stops.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{AtmoError, Result};

const ERROR_NOTICE_TIME: Duration = Duration::from_secs(20);
const INFO_NOTICE_TIME: Duration = Duration::from_secs(3);

/// Verbosity of the pipeline log, persisted as `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Error),
            2 => Ok(Self::Info),
            3 => Ok(Self::Debug),
            other => Err(AtmoError::configuration(format!(
                "log level {other} not in range 0 ... 3"
            ))),
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::Error,
            2 => Self::Info,
            _ => Self::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Error => "error",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// User-visible notice handed to a [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: LogLevel,
    pub message: String,
    pub display_time: Duration,
}

/// Host collaborator that shows notices to the user.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Default sink used when no host UI is attached: notices become log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifications;

impl NotificationSink for TracingNotifications {
    fn notify(&self, notice: &Notice) {
        match notice.level {
            LogLevel::Error => tracing::error!(
                target: "atmo::notification",
                display_ms = notice.display_time.as_millis() as u64,
                "{}",
                notice.message
            ),
            _ => tracing::info!(
                target: "atmo::notification",
                display_ms = notice.display_time.as_millis() as u64,
                "{}",
                notice.message
            ),
        }
    }
}

/// Shared handle onto the log level and notification sink.
#[derive(Clone)]
pub struct Observer {
    level: Arc<AtomicU8>,
    sink: Arc<dyn NotificationSink>,
}

impl Observer {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            level: Arc::new(AtomicU8::new(LogLevel::Info as u8)),
            sink,
        }
    }

    /// Observer that reports notices through `tracing` only.
    pub fn with_tracing() -> Self {
        Self::new(Arc::new(TracingNotifications))
    }

    /// Sets the level the pipeline starts with.
    pub fn init(&self, level: LogLevel) {
        self.set_level(level);
        tracing::debug!(%level, "observability initialised");
    }

    /// Silences the pipeline once it has stopped.
    pub fn teardown(&self) {
        self.set_level(LogLevel::None);
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_raw(self.level.load(Ordering::Acquire))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Release);
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::None && level <= self.level()
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        if !self.enabled(level) {
            return;
        }
        let message = message.as_ref();
        match level {
            LogLevel::Error => tracing::error!(target: "atmo", "{message}"),
            LogLevel::Info => tracing::info!(target: "atmo", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "atmo", "{message}"),
            LogLevel::None => {}
        }
    }

    pub fn notify(&self, level: LogLevel, message: impl Into<String>) {
        let display_time = if level == LogLevel::Error {
            ERROR_NOTICE_TIME
        } else {
            INFO_NOTICE_TIME
        };
        self.sink.notify(&Notice {
            level,
            message: message.into(),
            display_time,
        });
    }

    pub fn notify_and_log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        self.log(level, &message);
        self.notify(level, message);
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("level", &self.level())
            .finish()
    }
}
