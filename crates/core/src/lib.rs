//! Core library of the Atmolight ambient lighting pipeline.
//!
//! Video frames are captured from the host at the analysis rate, reduced to
//! per-zone colors by the native driver and handed to an independent output
//! loop through a single-slot frame handoff. Each subsystem lives in its own
//! module: settings in [`config`], driver selection and lifecycle in
//! [`driver`], the two schedulers in [`capture`] and [`output`], and the
//! startup sequence in [`service`].

pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod observe;
pub mod output;
pub mod service;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use capture::{CaptureScheduler, CaptureState, FrameSource, SchedulerState, SchedulerTimings};
pub use config::{
    ConfigSnapshot, ConfigSource, MemorySettings, Parameter, ParameterChange, ParameterKind,
    ParameterSet, ParameterStore, ParameterValue, RuntimeParameters, SettingsFile,
};
pub use driver::{
    AtmoDriver, DriverHandle, DriverRegistry, OutputDriver, OutputPort, OutputTarget,
    OUTPUT_DRIVER_INTERFACE_VERSION,
};
pub use error::{AtmoError, Result};
pub use frame::{CapturedImage, ColorFrame, FrameSlot, PixelFormat, RgbColor, Zone, ZoneLayout};
pub use observe::{LogLevel, Notice, NotificationSink, Observer, TracingNotifications};
pub use output::OutputScheduler;
pub use service::Service;
pub use timeline::StopSignal;
