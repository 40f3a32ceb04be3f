//! In-process fakes shared by the unit tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::{
    capture::{CaptureState, FrameSource},
    config::{MemorySettings, Parameter, ParameterSet, ParameterValue},
    driver::{AtmoDriver, DriverHandle, DriverRegistry, OutputDriver},
    frame::{CapturedImage, ColorFrame, PixelFormat, RgbColor, ZoneLayout},
    observe::{Notice, NotificationSink, Observer},
    AtmoError, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    NativeConfigure,
    NativeInstantConfigure,
    NativeOpen,
    NativeClose,
    NativeOutput(ColorFrame),
    NativeLightsOff,
    NativeWriteFailed,
    Analyze,
    ScriptedOpen,
    ScriptedClose,
    ScriptedInstantConfigure,
    ScriptedOutput(ColorFrame),
    ScriptedLightsOff,
    ScriptedWriteFailed,
    CaptureRequested(u32, u32),
}

#[derive(Debug)]
struct LogState {
    events: Vec<Event>,
    native: ParameterSet,
    fail_close: bool,
    failing_writes: u32,
}

const GAMMA_DEFAULT: i64 = 10;

/// Shared record of driver calls, plus the fake native driver's parameters.
#[derive(Debug, Clone)]
pub struct EventLog {
    shared: Arc<Mutex<LogState>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            shared: Arc::new(Mutex::new(LogState {
                events: Vec::new(),
                native: ParameterSet::defaults(),
                fail_close: false,
                failing_writes: 0,
            })),
        }
    }
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.shared.lock().unwrap().events.clone()
    }

    pub fn clear(&self) {
        self.shared.lock().unwrap().events.clear();
    }

    pub fn count(&self, filter: impl Fn(&Event) -> bool) -> usize {
        self.shared
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|event| filter(event))
            .count()
    }

    pub fn native_parm(&self, parameter: Parameter) -> ParameterValue {
        self.shared
            .lock()
            .unwrap()
            .native
            .get(parameter)
            .cloned()
            .unwrap_or(ParameterValue::Int(0))
    }

    pub fn fail_close(&self, fail: bool) {
        self.shared.lock().unwrap().fail_close = fail;
    }

    /// Makes the next `count` color writes fail, on either output target.
    pub fn fail_next_writes(&self, count: u32) {
        self.shared.lock().unwrap().failing_writes = count;
    }

    fn push(&self, event: Event) {
        self.shared.lock().unwrap().events.push(event);
    }

    fn take_write_failure(&self) -> bool {
        let mut state = self.shared.lock().unwrap();
        if state.failing_writes == 0 {
            return false;
        }
        if state.failing_writes != u32::MAX {
            state.failing_writes -= 1;
        }
        true
    }
}

/// Native driver that accepts up to 128 channels per zone and clamps the
/// output rate to at least 10 ms when configured. Every analyzed frame
/// differs from the previous one.
pub struct FakeNative {
    log: EventLog,
    analyzed: u8,
    gamma: i64,
}

impl FakeNative {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            analyzed: 0,
            gamma: ParameterSet::defaults().int(Parameter::Gamma),
        }
    }

    fn load_gamma(&mut self) {
        self.gamma = self.log.native_parm(Parameter::Gamma).as_int().unwrap_or(0);
    }
}

impl OutputDriver for FakeNative {
    fn open(&mut self, _parameters: &ParameterSet) -> Result<()> {
        self.log.push(Event::NativeOpen);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.log.shared.lock().unwrap().fail_close {
            return Err(AtmoError::driver("device vanished"));
        }
        self.log.push(Event::NativeClose);
        Ok(())
    }

    fn instant_configure(&mut self, _parameters: &ParameterSet) -> Result<()> {
        self.load_gamma();
        self.log.push(Event::NativeInstantConfigure);
        Ok(())
    }

    fn output_colors(&mut self, colors: &ColorFrame) -> Result<()> {
        if self.log.take_write_failure() {
            self.log.push(Event::NativeWriteFailed);
            return Err(AtmoError::driver("write to device failed"));
        }
        self.log.push(Event::NativeOutput(colors.clone()));
        Ok(())
    }

    fn turn_lights_off(&mut self) -> Result<()> {
        self.log.push(Event::NativeLightsOff);
        Ok(())
    }
}

impl AtmoDriver for FakeNative {
    fn parm(&self, parameter: Parameter) -> ParameterValue {
        self.log.native_parm(parameter)
    }

    fn set_parm(&mut self, parameter: Parameter, value: ParameterValue) -> Result<()> {
        let is_zone = matches!(
            parameter,
            Parameter::Top | Parameter::Bottom | Parameter::Left | Parameter::Right
        );
        if is_zone && value.as_int().unwrap_or(0) > 128 {
            return Err(AtmoError::driver(format!("{parameter} exceeds 128 channels")));
        }
        self.log.shared.lock().unwrap().native.set(parameter, value);
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        {
            let mut state = self.log.shared.lock().unwrap();
            let rate = state.native.int(Parameter::OutputRate).max(10);
            state.native.set(Parameter::OutputRate, rate);
        }
        self.load_gamma();
        self.log.push(Event::NativeConfigure);
        Ok(())
    }

    fn reset_filters(&mut self) {}

    fn analyze_image(&mut self, _image: &CapturedImage) -> Result<ColorFrame> {
        self.analyzed = self.analyzed.wrapping_add(1);
        self.log.push(Event::Analyze);
        let channels = {
            let state = self.log.shared.lock().unwrap();
            ZoneLayout::from_parameters(&state.native).total().max(1)
        };
        let value = self.analyzed;
        Ok(ColorFrame::new(vec![RgbColor::new(value, value, value); channels]))
    }

    fn filter_analyzed_colors(&mut self, colors: &ColorFrame) -> ColorFrame {
        colors.clone()
    }

    /// Raises blue by the active gamma's distance from its default, so
    /// frames show which gamma was in effect when they were filtered.
    fn filter_output_colors(&mut self, colors: &ColorFrame) -> ColorFrame {
        let shift = (self.gamma - GAMMA_DEFAULT).clamp(0, 255) as u8;
        ColorFrame::new(
            colors
                .colors()
                .iter()
                .map(|color| RgbColor::new(color.r, color.g, color.b.saturating_add(shift)))
                .collect(),
        )
    }
}

/// Scripted output driver reporting a configurable interface version.
pub struct ScriptedOutput {
    log: EventLog,
    version: u32,
}

impl ScriptedOutput {
    pub fn new(log: EventLog) -> Self {
        Self { log, version: 1 }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl OutputDriver for ScriptedOutput {
    fn interface_version(&self) -> u32 {
        self.version
    }

    fn open(&mut self, _parameters: &ParameterSet) -> Result<()> {
        self.log.push(Event::ScriptedOpen);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.push(Event::ScriptedClose);
        Ok(())
    }

    fn instant_configure(&mut self, _parameters: &ParameterSet) -> Result<()> {
        self.log.push(Event::ScriptedInstantConfigure);
        Ok(())
    }

    fn output_colors(&mut self, colors: &ColorFrame) -> Result<()> {
        if self.log.take_write_failure() {
            self.log.push(Event::ScriptedWriteFailed);
            return Err(AtmoError::driver("script driver write failed"));
        }
        self.log.push(Event::ScriptedOutput(colors.clone()));
        Ok(())
    }

    fn turn_lights_off(&mut self) -> Result<()> {
        self.log.push(Event::ScriptedLightsOff);
        Ok(())
    }
}

/// Frame source that plays video for a fixed window after creation and
/// completes every capture request immediately.
pub struct ScriptedFrameSource {
    log: EventLog,
    started: Instant,
    playing: Duration,
    aspect_ratio: f32,
    requested: Option<(u32, u32)>,
    state: CaptureState,
}

impl ScriptedFrameSource {
    pub fn new(log: EventLog, playing: Duration) -> Self {
        Self {
            log,
            started: Instant::now(),
            playing,
            aspect_ratio: 16.0 / 9.0,
            requested: None,
            state: CaptureState::Done,
        }
    }

    /// Leaves every capture pending forever.
    pub fn stalled(mut self) -> Self {
        self.state = CaptureState::Pending;
        self
    }
}

impl FrameSource for ScriptedFrameSource {
    fn is_playing_video(&self) -> bool {
        self.started.elapsed() < self.playing
    }

    fn capture_state(&self) -> CaptureState {
        self.state
    }

    fn wait_for_state_change(&self, timeout: Duration) -> CaptureState {
        if self.state == CaptureState::Pending {
            std::thread::sleep(timeout);
        }
        self.state
    }

    fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    fn request_capture(&mut self, width: u32, height: u32) -> Result<()> {
        self.log.push(Event::CaptureRequested(width, height));
        self.requested = Some((width, height));
        Ok(())
    }

    fn captured_image(&mut self) -> Result<CapturedImage> {
        let (width, height) = self
            .requested
            .take()
            .ok_or_else(|| AtmoError::Capture("no capture requested".into()))?;
        Ok(CapturedImage {
            width,
            height,
            format: PixelFormat::Rgba,
            pixels: vec![0; (width * height * 4) as usize],
        })
    }
}

/// Notification sink that keeps every notice it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingSink {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices().into_iter().map(|notice| notice.message).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

pub const SCRIPTED_DRIVER: &str = "mydriver";

fn registry(log: &EventLog, version: u32) -> DriverRegistry {
    let log = log.clone();
    DriverRegistry::new().with(SCRIPTED_DRIVER, move |_| {
        let driver = ScriptedOutput::new(log.clone()).with_version(version);
        Ok(Box::new(driver) as Box<dyn OutputDriver>)
    })
}

/// Handle over the fake native driver, with a scripted driver registered as
/// `mydriver` but not selected.
pub fn fake_handle() -> (DriverHandle, EventLog) {
    fake_handle_with(Observer::with_tracing())
}

pub fn fake_handle_with(observer: Observer) -> (DriverHandle, EventLog) {
    versioned_handle(observer, 1)
}

/// Like [`fake_handle_with`], with `mydriver` reporting `version`.
pub fn versioned_handle(observer: Observer, version: u32) -> (DriverHandle, EventLog) {
    let log = EventLog::default();
    let handle = DriverHandle::new(
        Box::new(FakeNative::new(log.clone())),
        registry(&log, version),
        observer,
    );
    (handle, log)
}

/// Handle selecting the scripted `mydriver` that reports `version`.
pub fn scripted_handle(version: u32) -> (DriverHandle, EventLog) {
    let log = EventLog::default();
    let mut handle = DriverHandle::new(
        Box::new(FakeNative::new(log.clone())),
        registry(&log, version),
        Observer::with_tracing(),
    );
    handle
        .set_parm(Parameter::Driver, ParameterValue::from("custom"))
        .unwrap();
    handle
        .set_parm(Parameter::CustomDriver, ParameterValue::from(SCRIPTED_DRIVER))
        .unwrap();
    (handle, log)
}

/// Factory defaults with `overrides` applied, as persisted text.
pub fn settings_with(overrides: &[(&str, &str)]) -> MemorySettings {
    let mut values: BTreeMap<String, String> = ParameterSet::defaults().to_settings();
    for (name, value) in overrides {
        values.insert(name.to_string(), value.to_string());
    }
    MemorySettings::with_values(values)
}
