//! Pipeline entry point: startup checks, scheduler run and teardown.

use crate::{
    capture::{CaptureScheduler, FrameSource, SchedulerTimings},
    config::{ConfigSource, Parameter, ParameterStore},
    driver::DriverHandle,
    observe::{LogLevel, Observer},
    timeline::StopSignal,
    AtmoError, Result,
};

/// Everything needed to run the pipeline once.
pub struct Service<S, F> {
    handle: DriverHandle,
    settings: S,
    frames: F,
    timings: SchedulerTimings,
    stop: StopSignal,
}

impl<S: ConfigSource, F: FrameSource> Service<S, F> {
    pub fn new(handle: DriverHandle, settings: S, frames: F) -> Self {
        Self {
            handle,
            settings,
            frames,
            timings: SchedulerTimings::default(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_timings(mut self, timings: SchedulerTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Requesting this signal ends a running service.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Loads and applies the settings, configures the drivers and runs the
    /// capture scheduler until stopped. Startup failures are notified and
    /// returned without starting the scheduler. A service disabled in its
    /// settings returns immediately.
    pub fn run(self) -> Result<()> {
        let observer = self.handle.observer().clone();
        observer.init(LogLevel::Info);
        observer.log(LogLevel::Info, "started");

        let outcome = self.serve(&observer);

        observer.log(LogLevel::Info, "finished");
        observer.teardown();
        outcome
    }

    fn serve(self, observer: &Observer) -> Result<()> {
        let Self {
            mut handle,
            settings,
            frames,
            timings,
            stop,
        } = self;
        let mut store = ParameterStore::new(settings);

        if !store.is_configured()? {
            let err = AtmoError::configuration("settings are not configured");
            observer.notify_and_log(LogLevel::Error, err.to_string());
            return Err(err);
        }

        let snapshot = startup(observer, store.load(&mut handle, false))?;
        if !snapshot.parameters.flag(Parameter::Enabled) {
            observer.log(LogLevel::Info, "disabled in settings, not starting");
            return Ok(());
        }

        startup(observer, handle.configure())?;
        if let Err(err) = store.persist(&handle) {
            observer.notify_and_log(LogLevel::Error, err.to_string());
        }

        let mut scheduler =
            CaptureScheduler::new(handle, store, frames, timings)?.with_stop_signal(stop);
        let outcome = scheduler.run();

        if let Err(err) = scheduler.handle_mut().close() {
            observer.notify_and_log(LogLevel::Error, err.to_string());
        }
        outcome
    }
}

fn startup<T>(observer: &Observer, result: Result<T>) -> Result<T> {
    result.map_err(|err| {
        observer.notify_and_log(LogLevel::Error, err.to_string());
        err
    })
}
