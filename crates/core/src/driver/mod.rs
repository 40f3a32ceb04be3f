//! Lighting driver capabilities and the handle the schedulers drive them through.
//!
//! A [`DriverHandle`] owns the native analysis driver and at most one open
//! output target: either the native driver itself or a scripted custom
//! driver resolved through the [`DriverRegistry`].

mod port;
mod registry;

use std::{
    fmt,
    sync::{Arc, Mutex},
};

pub use port::OutputPort;
pub use registry::{DriverFactory, DriverRegistry, Resolution};

use crate::{
    config::{diff, Parameter, ParameterChange, ParameterSet, ParameterValue},
    error::lock,
    frame::{CapturedImage, ColorFrame},
    observe::{LogLevel, Observer},
    AtmoError, Result,
};

/// Interface version scripted output drivers must report.
pub const OUTPUT_DRIVER_INTERFACE_VERSION: u32 = 1;

/// `driver` value asking for a custom driver named by `custom_driver`.
pub const CUSTOM_DRIVER: &str = "custom";

/// Native driver identifier that discards all output.
pub const NULL_DRIVER: &str = "null";

/// Destination for finalized color frames.
pub trait OutputDriver: Send {
    fn interface_version(&self) -> u32 {
        OUTPUT_DRIVER_INTERFACE_VERSION
    }

    /// Opens the device and sizes it for the configured channels.
    fn open(&mut self, parameters: &ParameterSet) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Applies parameters that are safe to change while streaming.
    fn instant_configure(&mut self, parameters: &ParameterSet) -> Result<()>;

    /// Colors are ordered top, bottom, left, right, center, then the corners.
    fn output_colors(&mut self, colors: &ColorFrame) -> Result<()>;

    fn turn_lights_off(&mut self) -> Result<()>;
}

/// Views any output driver as a trait object.
pub trait AsOutputDriver {
    fn as_output_mut(&mut self) -> &mut dyn OutputDriver;
}

impl<T: OutputDriver> AsOutputDriver for T {
    fn as_output_mut(&mut self) -> &mut dyn OutputDriver {
        self
    }
}

/// Native driver: color analysis, filter chain and its own output device.
///
/// `custom_driver` and `log_level` never reach the native driver; the handle
/// keeps them itself.
pub trait AtmoDriver: OutputDriver + AsOutputDriver {
    fn parm(&self, parameter: Parameter) -> ParameterValue;

    /// Stores a value for the next configure. Out of range values are
    /// rejected with a driver error.
    fn set_parm(&mut self, parameter: Parameter, value: ParameterValue) -> Result<()>;

    /// Activates the stored parameters, (re)opening the output device.
    fn configure(&mut self) -> Result<()>;

    fn reset_filters(&mut self);

    fn analyze_image(&mut self, image: &CapturedImage) -> Result<ColorFrame>;

    fn filter_analyzed_colors(&mut self, colors: &ColorFrame) -> ColorFrame;

    fn filter_output_colors(&mut self, colors: &ColorFrame) -> ColorFrame;
}

pub type SharedDriver = Arc<Mutex<Box<dyn AtmoDriver>>>;
pub type SharedOutput = Arc<Mutex<Box<dyn OutputDriver>>>;

/// Currently open output target.
#[derive(Clone)]
pub enum OutputTarget {
    Native,
    Scripted { name: String, driver: SharedOutput },
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("Native"),
            Self::Scripted { name, .. } => f.debug_struct("Scripted").field("name", name).finish(),
        }
    }
}

/// Capability handle over the active driver combination.
///
/// Mutated only by the capture scheduler; output sessions receive an
/// [`OutputPort`] instead.
pub struct DriverHandle {
    native: SharedDriver,
    registry: DriverRegistry,
    observer: Observer,
    use_custom_driver: bool,
    custom_driver: String,
    output: Option<OutputTarget>,
}

impl DriverHandle {
    pub fn new(native: Box<dyn AtmoDriver>, registry: DriverRegistry, observer: Observer) -> Self {
        Self {
            native: Arc::new(Mutex::new(native)),
            registry,
            observer,
            use_custom_driver: false,
            custom_driver: String::new(),
            output: None,
        }
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn output_target(&self) -> Option<&OutputTarget> {
        self.output.as_ref()
    }

    /// Whether output goes to a scripted driver distinct from the analysis driver.
    pub fn has_separate_output(&self) -> bool {
        matches!(self.output, Some(OutputTarget::Scripted { .. }))
    }

    pub fn get_parm(&self, parameter: Parameter) -> Result<ParameterValue> {
        Ok(match parameter {
            Parameter::Driver if self.use_custom_driver => ParameterValue::from(CUSTOM_DRIVER),
            Parameter::CustomDriver => ParameterValue::from(self.custom_driver.as_str()),
            Parameter::LogLevel => ParameterValue::Int(self.observer.level().code()),
            other => self.lock_native()?.parm(other),
        })
    }

    pub fn set_parm(&mut self, parameter: Parameter, value: ParameterValue) -> Result<()> {
        if value.kind() != parameter.kind() {
            return Err(AtmoError::configuration(format!(
                "parameter '{parameter}' expects a {:?} value, got '{value}'",
                parameter.kind()
            )));
        }
        match parameter {
            Parameter::LogLevel => {
                let level = LogLevel::from_code(value.as_int().unwrap_or_default())?;
                self.observer.set_level(level);
                Ok(())
            }
            Parameter::CustomDriver => {
                self.custom_driver = value.to_string();
                Ok(())
            }
            Parameter::Driver => {
                self.use_custom_driver = value.as_text() == Some(CUSTOM_DRIVER);
                let native_value = if self.use_custom_driver {
                    ParameterValue::from(NULL_DRIVER)
                } else {
                    value
                };
                self.lock_native()?.set_parm(Parameter::Driver, native_value)
            }
            other => self.lock_native()?.set_parm(other, value),
        }
    }

    /// Effective values of every parameter.
    pub fn parameters(&self) -> Result<ParameterSet> {
        let mut set = ParameterSet::new();
        for &parameter in Parameter::ALL {
            set.set(parameter, self.get_parm(parameter)?);
        }
        Ok(set)
    }

    /// Applies every value in `parameters`. If any value is rejected the
    /// values applied so far are restored and a configuration error returned.
    pub fn apply(&mut self, parameters: &ParameterSet) -> Result<Vec<ParameterChange>> {
        let previous = self.parameters()?;
        let mut applied = Vec::new();

        for (parameter, value) in parameters.iter() {
            if let Err(err) = self.set_parm(parameter, value.clone()) {
                for &done in applied.iter().rev() {
                    if let Some(old) = previous.get(done) {
                        if let Err(err) = self.set_parm(done, old.clone()) {
                            self.observer.log(
                                LogLevel::Debug,
                                format!("restoring parameter '{done}' failed: {err}"),
                            );
                        }
                    }
                }
                return Err(AtmoError::configuration(format!(
                    "parameter '{parameter}': {err}"
                )));
            }
            applied.push(parameter);
        }

        Ok(diff(&previous, &self.parameters()?))
    }

    /// Full reconfiguration: closes the current output target, resolves and
    /// opens the new one, then configures the native driver.
    ///
    /// A failing close is reported but does not stop the new target from
    /// being opened; the old one is released either way.
    pub fn configure(&mut self) -> Result<()> {
        if let Err(err) = self.close() {
            self.observer
                .notify_and_log(LogLevel::Error, format!("closing output driver: {err}"));
        }

        if self.use_custom_driver {
            if self.custom_driver.is_empty() {
                return Err(AtmoError::configuration("No custom driver specified!"));
            }
            match self.registry.resolve(&self.custom_driver, &self.observer)? {
                Resolution::Scripted(mut driver) => {
                    driver.open(&self.parameters()?)?;
                    let shared: SharedOutput = Arc::new(Mutex::new(driver));
                    self.output = Some(OutputTarget::Scripted {
                        name: self.custom_driver.clone(),
                        driver: shared.clone(),
                    });
                    lock(&shared, "output driver")?.turn_lights_off()?;
                    self.observer.log(
                        LogLevel::Info,
                        format!("script custom driver '{}' opened", self.custom_driver),
                    );
                }
                Resolution::Native(name) => {
                    self.observer.log(
                        LogLevel::Info,
                        format!("no script custom driver '{name}', will try native custom driver"),
                    );
                    self.lock_native()?
                        .set_parm(Parameter::Driver, ParameterValue::Text(name))?;
                    self.output = Some(OutputTarget::Native);
                }
            }
        } else {
            self.output = Some(OutputTarget::Native);
        }

        self.lock_native()?.configure()
    }

    /// Lightweight reconfiguration safe while streaming: the separate output
    /// driver first, then the analysis driver.
    pub fn instant_configure(&mut self) -> Result<()> {
        let parameters = self.parameters()?;
        if let Some(OutputTarget::Scripted { driver, .. }) = &self.output {
            lock(driver, "output driver")?.instant_configure(&parameters)?;
        }
        self.lock_native()?.instant_configure(&parameters)
    }

    /// Closes the open output target, if any. The target is released even
    /// when closing reports an error.
    pub fn close(&mut self) -> Result<()> {
        match self.output.take() {
            Some(OutputTarget::Native) => self.lock_native()?.close(),
            Some(OutputTarget::Scripted { driver, .. }) => lock(&driver, "output driver")?.close(),
            None => Ok(()),
        }
    }

    pub fn reset_filters(&self) -> Result<()> {
        self.lock_native()?.reset_filters();
        Ok(())
    }

    pub fn analyze_image(&self, image: &CapturedImage) -> Result<ColorFrame> {
        self.lock_native()?.analyze_image(image)
    }

    pub fn filter_analyzed_colors(&self, colors: &ColorFrame) -> Result<ColorFrame> {
        Ok(self.lock_native()?.filter_analyzed_colors(colors))
    }

    pub fn filter_output_colors(&self, colors: &ColorFrame) -> Result<ColorFrame> {
        Ok(self.lock_native()?.filter_output_colors(colors))
    }

    pub fn output_colors(&self, colors: &ColorFrame) -> Result<()> {
        self.with_output(|driver| driver.output_colors(colors))
    }

    pub fn turn_lights_off(&self) -> Result<()> {
        self.with_output(|driver| driver.turn_lights_off())
    }

    pub fn open_output_driver(&self) -> Result<()> {
        let parameters = self.parameters()?;
        self.with_output(|driver| driver.open(&parameters))
    }

    pub fn close_output_driver(&self) -> Result<()> {
        self.with_output(|driver| driver.close())
    }

    /// Output view for one playback session.
    pub fn output_port(&self) -> Result<OutputPort> {
        let target = self
            .output
            .clone()
            .ok_or_else(|| AtmoError::driver("no output driver opened"))?;
        Ok(OutputPort::new(
            self.native.clone(),
            target,
            self.parameters()?,
            self.observer.clone(),
        ))
    }

    fn with_output<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut dyn OutputDriver) -> Result<()>,
    {
        match &self.output {
            Some(OutputTarget::Native) => op(self.lock_native()?.as_output_mut()),
            Some(OutputTarget::Scripted { driver, .. }) => {
                let mut driver = lock(driver, "output driver")?;
                op(&mut **driver)
            }
            None => Err(AtmoError::driver("no output driver opened")),
        }
    }

    fn lock_native(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn AtmoDriver>>> {
        lock(&self.native, "native driver")
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("registry", &self.registry)
            .field("use_custom_driver", &self.use_custom_driver)
            .field("custom_driver", &self.custom_driver)
            .field("output", &self.output)
            .finish()
    }
}
