//! Capture scheduler: the long-lived control loop of the pipeline.
//!
//! It polls the frame source for playback, requests captures at the analysis
//! rate, publishes analyzed frames to the [`FrameSlot`] and owns the output
//! loop of the current playback session. Settings changes are detected by
//! polling the store; while streaming only the instant path is applied and
//! the full reconfiguration is deferred until playback stops.

use std::time::{Duration, Instant};

use crate::{
    config::{diff, ConfigSource, ParameterStore, RuntimeParameters},
    driver::DriverHandle,
    frame::{CapturedImage, FrameSlot},
    observe::{LogLevel, Observer},
    output::OutputScheduler,
    timeline::{format_interval, next_deadline, IntervalStats, StopSignal},
    AtmoError, Result,
};

/// Progress of the most recent capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Pending,
    Done,
    Failed,
}

/// Host capture API the scheduler consumes.
pub trait FrameSource: Send {
    fn is_playing_video(&self) -> bool;

    fn capture_state(&self) -> CaptureState;

    /// Blocks until the capture state changes or `timeout` elapses, returning
    /// the state afterwards.
    fn wait_for_state_change(&self, timeout: Duration) -> CaptureState;

    /// Width over height of the playing video; zero or less when unknown.
    fn aspect_ratio(&self) -> f32;

    fn request_capture(&mut self, width: u32, height: u32) -> Result<()>;

    /// Pixels of the last completed capture.
    fn captured_image(&mut self) -> Result<CapturedImage>;
}

/// Fixed cadences of the scheduler that do not come from the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTimings {
    /// Poll interval for playback while no video plays.
    pub idle_wait: Duration,
    /// Interval between checks for changed settings.
    pub config_poll: Duration,
    /// How long stopping an output loop may take before the scheduler moves on.
    pub stop_grace: Duration,
    /// A capture pending for this many analysis periods is abandoned.
    pub pending_timeout_periods: u32,
}

impl Default for SchedulerTimings {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(500),
            config_poll: Duration::from_secs(1),
            stop_grace: Duration::from_millis(500),
            pending_timeout_periods: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Streaming,
    CapturingPending,
    Stopped,
}

/// Everything that lives exactly as long as one video playback.
struct PlaybackSession {
    output: OutputScheduler,
    captures: IntervalStats,
    deferred_reconfigure: bool,
}

pub struct CaptureScheduler<S, F> {
    handle: DriverHandle,
    store: ParameterStore<S>,
    source: F,
    timings: SchedulerTimings,
    observer: Observer,
    stop: StopSignal,
    slot: FrameSlot,
    state: SchedulerState,
    runtime: RuntimeParameters,
    session: Option<PlaybackSession>,
    next_capture: Instant,
    next_config_check: Instant,
    pending_since: Instant,
}

impl<S: ConfigSource, F: FrameSource> CaptureScheduler<S, F> {
    /// Builds a scheduler over a configured handle.
    pub fn new(
        handle: DriverHandle,
        store: ParameterStore<S>,
        source: F,
        timings: SchedulerTimings,
    ) -> Result<Self> {
        let runtime = RuntimeParameters::derive(&handle.parameters()?);
        let observer = handle.observer().clone();
        let now = Instant::now();
        Ok(Self {
            handle,
            store,
            source,
            timings,
            observer,
            stop: StopSignal::new(),
            slot: FrameSlot::new(),
            state: SchedulerState::Idle,
            runtime,
            session: None,
            next_capture: now,
            next_config_check: now,
            pending_since: now,
        })
    }

    /// Uses `stop` instead of a private signal, so a caller holding it can
    /// end the run.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Signal that ends [`Self::run`] at its next checkpoint.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn runtime(&self) -> RuntimeParameters {
        self.runtime
    }

    pub fn handle(&self) -> &DriverHandle {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut DriverHandle {
        &mut self.handle
    }

    pub fn store(&self) -> &ParameterStore<S> {
        &self.store
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    /// Runs until a stop is requested or a full reconfiguration fails. A
    /// playing session is wound down before returning either way.
    pub fn run(&mut self) -> Result<()> {
        self.observer.notify_and_log(LogLevel::Info, "Service running");

        let outcome = loop {
            if self.stop.is_requested() {
                break Ok(());
            }
            if let Err(err) = self.step() {
                break Err(err);
            }
        };

        if let Some(session) = self.session.take() {
            self.finish_session(session);
        }
        self.state = SchedulerState::Stopped;
        self.observer.notify_and_log(LogLevel::Info, "Service stopped");
        outcome
    }

    /// One pass of the control loop. Every pass either waits on something
    /// (capture completion, next deadline) or performs one action.
    fn step(&mut self) -> Result<()> {
        if self.state == SchedulerState::CapturingPending && !self.collect_capture()? {
            return Ok(());
        }

        let now = Instant::now();
        if now < self.next_capture {
            self.stop.wait_until(self.next_capture);
            return Ok(());
        }

        if now >= self.next_config_check {
            self.next_config_check = now + self.timings.config_poll;
            return self.check_config();
        }

        if self.source.is_playing_video() {
            if self.session.is_none() {
                self.begin_session()?;
            }
            self.request_capture();
            self.next_capture = next_deadline(self.next_capture, self.runtime.analyze_period, now);
        } else {
            if let Some(session) = self.session.take() {
                self.end_session(session)?;
            }
            self.next_capture = now + self.timings.idle_wait;
        }
        Ok(())
    }

    /// Handles the in-flight capture. Returns `false` while it is still
    /// pending, after having waited a bounded time for it.
    fn collect_capture(&mut self) -> Result<bool> {
        let state = match self.source.capture_state() {
            CaptureState::Pending => self.source.wait_for_state_change(self.runtime.capture_wait),
            other => other,
        };

        match state {
            CaptureState::Pending => {
                let limit = self.runtime.analyze_period * self.timings.pending_timeout_periods;
                if self.pending_since.elapsed() < limit {
                    return Ok(false);
                }
                self.observer
                    .log(LogLevel::Debug, "capture did not complete in time, abandoned");
            }
            CaptureState::Done => match self.analyze() {
                Ok(()) => {
                    if let Some(session) = self.session.as_mut() {
                        session.captures.record();
                    }
                }
                Err(err) => self.observer.log(LogLevel::Debug, err.to_string()),
            },
            CaptureState::Failed => {
                self.observer.log(LogLevel::Debug, "capture failed");
            }
        }

        self.state = self.settled_state();
        Ok(true)
    }

    fn analyze(&mut self) -> Result<()> {
        let image = self
            .source
            .captured_image()
            .map_err(|err| AtmoError::Capture(err.to_string()))?;
        let colors = self.handle.analyze_image(&image)?;
        self.slot.publish(colors)
    }

    fn request_capture(&mut self) {
        let aspect_ratio = self.source.aspect_ratio();
        let Some((width, height)) = self.runtime.capture_size(aspect_ratio) else {
            return;
        };
        match self.source.request_capture(width, height) {
            Ok(()) => {
                self.state = SchedulerState::CapturingPending;
                self.pending_since = Instant::now();
            }
            Err(err) => self
                .observer
                .log(LogLevel::Debug, format!("capture request failed: {err}")),
        }
    }

    fn begin_session(&mut self) -> Result<()> {
        self.observer.log(
            LogLevel::Info,
            format!(
                "start playing video: aspect ratio: {:.4}",
                self.source.aspect_ratio()
            ),
        );
        self.slot.clear()?;
        let output = OutputScheduler::start(
            self.handle.output_port()?,
            self.slot.clone(),
            self.observer.clone(),
        )?;
        self.session = Some(PlaybackSession {
            output,
            captures: IntervalStats::start(),
            deferred_reconfigure: false,
        });
        self.state = SchedulerState::Streaming;
        Ok(())
    }

    fn end_session(&mut self, session: PlaybackSession) -> Result<()> {
        self.observer.log(LogLevel::Info, "stop playing video");
        let deferred = session.deferred_reconfigure;
        self.finish_session(session);
        self.state = self.settled_state();

        if deferred {
            self.observer
                .log(LogLevel::Info, "applying configuration deferred during playback");
            self.reconfigure()?;
        }
        Ok(())
    }

    fn finish_session(&mut self, session: PlaybackSession) {
        if !session.output.stop(self.timings.stop_grace) {
            self.observer
                .log(LogLevel::Error, "output thread did not stop within grace period");
        }
        self.observer.log(
            LogLevel::Info,
            format!(
                "average capture interval: {}",
                format_interval(session.captures.average())
            ),
        );
    }

    fn settled_state(&self) -> SchedulerState {
        if self.session.is_some() {
            SchedulerState::Streaming
        } else {
            SchedulerState::Idle
        }
    }

    /// Reloads changed settings. A rejected load is reported and the previous
    /// values stay active; only a failing full reconfiguration is fatal.
    fn check_config(&mut self) -> Result<()> {
        if !self.store.has_changed()? {
            return Ok(());
        }
        self.observer
            .log(LogLevel::Info, "update of configuration detected");

        let before = self.handle.parameters()?;
        let snapshot = match self.store.load(&mut self.handle, true) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.observer.notify_and_log(LogLevel::Error, err.to_string());
                return Ok(());
            }
        };

        let Some(session) = self.session.as_mut() else {
            return self.reconfigure();
        };

        session.deferred_reconfigure = true;
        for change in diff(&before, &snapshot.parameters) {
            if change.parameter.needs_full_reconfigure() {
                self.observer.log(
                    LogLevel::Info,
                    format!("{change} takes effect when playback stops"),
                );
            }
        }
        if let Err(err) = self.handle.instant_configure() {
            self.observer.notify_and_log(LogLevel::Error, err.to_string());
        }
        Ok(())
    }

    /// Full reconfiguration followed by persisting the effective values and
    /// re-deriving the runtime parameters.
    fn reconfigure(&mut self) -> Result<()> {
        if let Err(err) = self.handle.configure() {
            self.observer.notify_and_log(LogLevel::Error, err.to_string());
            self.state = SchedulerState::Stopped;
            return Err(err);
        }
        if let Err(err) = self.store.persist(&self.handle) {
            self.observer.notify_and_log(LogLevel::Error, err.to_string());
        }
        self.runtime = RuntimeParameters::derive(&self.handle.parameters()?);
        Ok(())
    }
}
