use crate::{
    config::{Parameter, ParameterSet},
    error::lock,
    frame::ColorFrame,
    observe::{LogLevel, Observer},
    Result,
};

use super::{OutputTarget, SharedDriver};

/// Output-facing view of a [`super::DriverHandle`] owned by one playback
/// session.
///
/// Remembers the last frame written successfully so identical consecutive
/// frames reach the device only once.
pub struct OutputPort {
    native: SharedDriver,
    target: OutputTarget,
    parameters: ParameterSet,
    observer: Observer,
    last_sent: Option<ColorFrame>,
}

impl OutputPort {
    pub(crate) fn new(
        native: SharedDriver,
        target: OutputTarget,
        parameters: ParameterSet,
        observer: Observer,
    ) -> Self {
        Self {
            native,
            target,
            parameters,
            observer,
            last_sent: None,
        }
    }

    /// Whether output goes through the analysis driver itself.
    pub fn shares_analysis_driver(&self) -> bool {
        matches!(self.target, OutputTarget::Native)
    }

    /// Current output rate in milliseconds, read from the analysis driver.
    pub fn output_rate(&self) -> Result<i64> {
        let driver = lock(&self.native, "native driver")?;
        Ok(driver.parm(Parameter::OutputRate).as_int().unwrap_or(1).max(1))
    }

    pub fn reset_filters(&self) -> Result<()> {
        lock(&self.native, "native driver")?.reset_filters();
        Ok(())
    }

    /// Runs the analyzed-color filter followed by the output-color filter.
    pub fn filter(&self, frame: &ColorFrame) -> Result<ColorFrame> {
        let mut driver = lock(&self.native, "native driver")?;
        let analyzed = driver.filter_analyzed_colors(frame);
        Ok(driver.filter_output_colors(&analyzed))
    }

    /// Writes `colors` unless they equal the last frame written. Returns
    /// whether the device was written to.
    pub fn output_colors(&mut self, colors: &ColorFrame) -> Result<bool> {
        if self.last_sent.as_ref() == Some(colors) {
            return Ok(false);
        }
        self.last_sent = None;
        self.write(|driver| driver.output_colors(colors))?;
        self.last_sent = Some(colors.clone());
        Ok(true)
    }

    pub fn turn_lights_off(&mut self) -> Result<()> {
        self.last_sent = None;
        self.write(|driver| driver.turn_lights_off())
    }

    /// Recovers from a possible device suspend: closes the output target and
    /// opens it again. When output goes through the analysis driver a full
    /// configure is run instead.
    pub fn reopen(&mut self) -> Result<()> {
        self.last_sent = None;
        if let Err(err) = self.write(|driver| driver.close()) {
            self.observer
                .log(LogLevel::Debug, format!("closing output before reopen: {err}"));
        }

        match &self.target {
            OutputTarget::Native => lock(&self.native, "native driver")?.configure(),
            OutputTarget::Scripted { driver, .. } => {
                let mut driver = lock(driver, "output driver")?;
                driver.open(&self.parameters)?;
                driver.turn_lights_off()
            }
        }
    }

    fn write<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut dyn super::OutputDriver) -> Result<()>,
    {
        match &self.target {
            OutputTarget::Native => {
                let mut driver = lock(&self.native, "native driver")?;
                op(driver.as_output_mut())
            }
            OutputTarget::Scripted { driver, .. } => {
                let mut driver = lock(driver, "output driver")?;
                op(driver.as_mut())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        frame::{ColorFrame, RgbColor},
        testing::{fake_handle, scripted_handle, Event},
    };

    #[test]
    fn identical_consecutive_frames_are_written_once() {
        let (mut handle, log) = fake_handle();
        handle.configure().unwrap();
        let mut port = handle.output_port().unwrap();
        let frame = ColorFrame::new(vec![RgbColor::new(9, 9, 9)]);

        assert!(port.output_colors(&frame).unwrap());
        assert!(!port.output_colors(&frame).unwrap());

        assert_eq!(log.count(|event| matches!(event, Event::NativeOutput(_))), 1);
    }

    #[test]
    fn lights_off_forgets_the_last_frame() {
        let (mut handle, log) = scripted_handle(1);
        handle.configure().unwrap();
        let mut port = handle.output_port().unwrap();
        let frame = ColorFrame::new(vec![RgbColor::new(1, 1, 1)]);

        port.output_colors(&frame).unwrap();
        port.turn_lights_off().unwrap();
        port.output_colors(&frame).unwrap();

        assert_eq!(log.count(|event| matches!(event, Event::ScriptedOutput(_))), 2);
    }

    #[test]
    fn reopen_of_scripted_output_closes_then_opens() {
        let (mut handle, log) = scripted_handle(1);
        handle.configure().unwrap();
        let mut port = handle.output_port().unwrap();
        log.clear();

        port.reopen().unwrap();

        assert_eq!(
            log.events(),
            vec![
                Event::ScriptedClose,
                Event::ScriptedOpen,
                Event::ScriptedLightsOff
            ]
        );
    }

    #[test]
    fn reopen_of_native_output_reconfigures() {
        let (mut handle, log) = fake_handle();
        handle.configure().unwrap();
        let mut port = handle.output_port().unwrap();
        log.clear();

        port.reopen().unwrap();

        assert!(port.shares_analysis_driver());
        assert_eq!(log.events(), vec![Event::NativeClose, Event::NativeConfigure]);
    }
}
