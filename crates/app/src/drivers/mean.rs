use atmo_core::{
    AtmoDriver, AtmoError, CapturedImage, ColorFrame, OutputDriver, Parameter, ParameterSet,
    ParameterValue, Result, RgbColor, ZoneLayout,
};

use super::file::FileOutput;

/// Accepted integer range per parameter; unlisted parameters take any value.
fn range(parameter: Parameter) -> Option<(i64, i64)> {
    Some(match parameter {
        Parameter::Top | Parameter::Bottom | Parameter::Left | Parameter::Right => (0, 128),
        Parameter::Overscan => (0, 200),
        Parameter::DarknessLimit => (0, 100),
        Parameter::Brightness => (50, 300),
        Parameter::Filter => (0, 3),
        Parameter::FilterSmoothness => (1, 100),
        Parameter::OutputRate | Parameter::AnalyzeRate => (10, 500),
        Parameter::WcRed | Parameter::WcGreen | Parameter::WcBlue => (0, 255),
        Parameter::Gamma => (0, 30),
        Parameter::AnalyzeSize => (0, 3),
        _ => return None,
    })
}

enum Device {
    Null,
    File(FileOutput),
}

/// Reference native driver: every channel gets the mean color of the whole
/// image, smoothed over time and corrected for brightness, white calibration
/// and gamma.
///
/// Its own output device is chosen by `driver`: `null` discards frames and
/// `file` appends them to `driver_param`.
pub struct MeanDriver {
    parm: ParameterSet,
    active: ParameterSet,
    layout: ZoneLayout,
    device: Option<Device>,
    smoothed: Option<ColorFrame>,
}

impl Default for MeanDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MeanDriver {
    pub fn new() -> Self {
        Self {
            parm: ParameterSet::defaults(),
            active: ParameterSet::defaults(),
            layout: ZoneLayout::default(),
            device: None,
            smoothed: None,
        }
    }

    fn device(&mut self) -> Result<&mut Device> {
        self.device
            .as_mut()
            .ok_or_else(|| AtmoError::driver("output driver is not opened"))
    }
}

impl OutputDriver for MeanDriver {
    fn open(&mut self, parameters: &ParameterSet) -> Result<()> {
        let device = match parameters.text(Parameter::Driver) {
            "null" => Device::Null,
            "file" => {
                let mut file = FileOutput::new("atmo.out");
                file.open(parameters)?;
                Device::File(file)
            }
            other => {
                return Err(AtmoError::driver(format!(
                    "output driver '{other}' is not available"
                )))
            }
        };
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.device.take() {
            Some(Device::File(mut file)) => file.close(),
            _ => Ok(()),
        }
    }

    fn instant_configure(&mut self, _parameters: &ParameterSet) -> Result<()> {
        for (parameter, value) in self.parm.iter() {
            if !parameter.needs_full_reconfigure() {
                self.active.set(parameter, value.clone());
            }
        }
        Ok(())
    }

    fn output_colors(&mut self, colors: &ColorFrame) -> Result<()> {
        match self.device()? {
            Device::Null => Ok(()),
            Device::File(file) => file.output_colors(colors),
        }
    }

    fn turn_lights_off(&mut self) -> Result<()> {
        match self.device()? {
            Device::Null => Ok(()),
            Device::File(file) => file.turn_lights_off(),
        }
    }
}

impl AtmoDriver for MeanDriver {
    fn parm(&self, parameter: Parameter) -> ParameterValue {
        self.parm
            .get(parameter)
            .cloned()
            .unwrap_or(ParameterValue::Int(0))
    }

    fn set_parm(&mut self, parameter: Parameter, value: ParameterValue) -> Result<()> {
        if let (Some((min, max)), Some(number)) = (range(parameter), value.as_int()) {
            if !(min..=max).contains(&number) {
                return Err(AtmoError::driver(format!(
                    "{parameter} {number} not in range {min} ... {max}"
                )));
            }
        }
        self.parm.set(parameter, value);
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        self.close()?;
        self.active = self.parm.clone();
        self.layout = ZoneLayout::from_parameters(&self.active);
        self.smoothed = None;
        let active = self.active.clone();
        self.open(&active)?;
        self.turn_lights_off()
    }

    fn reset_filters(&mut self) {
        self.smoothed = None;
    }

    fn analyze_image(&mut self, image: &CapturedImage) -> Result<ColorFrame> {
        let mut sum = [0u64; 3];
        let mut count = 0u64;
        for y in 0..image.height {
            for x in 0..image.width {
                if let Some(color) = image.pixel(x, y) {
                    sum[0] += u64::from(color.r);
                    sum[1] += u64::from(color.g);
                    sum[2] += u64::from(color.b);
                    count += 1;
                }
            }
        }
        if count == 0 {
            return Err(AtmoError::Capture(format!("empty image {image:?}")));
        }

        let mean = RgbColor::new(
            (sum[0] / count) as u8,
            (sum[1] / count) as u8,
            (sum[2] / count) as u8,
        );
        let limit = self.active.int(Parameter::DarknessLimit);
        let color = if i64::from(mean.r.max(mean.g).max(mean.b)) < limit {
            RgbColor::BLACK
        } else {
            mean
        };
        Ok(ColorFrame::new(vec![color; self.layout.total()]))
    }

    fn filter_analyzed_colors(&mut self, colors: &ColorFrame) -> ColorFrame {
        if self.active.int(Parameter::Filter) == 0 {
            return colors.clone();
        }
        let keep = self.active.int(Parameter::FilterSmoothness).clamp(0, 100) as u32;
        let filtered = match &self.smoothed {
            Some(previous) if previous.len() == colors.len() => ColorFrame::new(
                previous
                    .colors()
                    .iter()
                    .zip(colors.colors())
                    .map(|(old, new)| blend(*old, *new, keep))
                    .collect(),
            ),
            _ => colors.clone(),
        };
        self.smoothed = Some(filtered.clone());
        filtered
    }

    fn filter_output_colors(&mut self, colors: &ColorFrame) -> ColorFrame {
        let brightness = self.active.int(Parameter::Brightness).max(0) as u32;
        let white = [
            self.active.int(Parameter::WcRed).clamp(0, 255) as u32,
            self.active.int(Parameter::WcGreen).clamp(0, 255) as u32,
            self.active.int(Parameter::WcBlue).clamp(0, 255) as u32,
        ];
        let gamma = self.active.int(Parameter::Gamma);

        let correct = |value: u8, white: u32| -> u8 {
            let value = (u32::from(value) * brightness / 100).min(255);
            let value = value * white / 255;
            let value = if gamma > 10 {
                ((value as f64 / 255.0).powf(gamma as f64 / 10.0) * 255.0).round() as u32
            } else {
                value
            };
            value.min(255) as u8
        };

        ColorFrame::new(
            colors
                .colors()
                .iter()
                .map(|color| {
                    RgbColor::new(
                        correct(color.r, white[0]),
                        correct(color.g, white[1]),
                        correct(color.b, white[2]),
                    )
                })
                .collect(),
        )
    }
}

/// Weighted average keeping `keep` percent of `old`.
fn blend(old: RgbColor, new: RgbColor, keep: u32) -> RgbColor {
    let mix = |old: u8, new: u8| {
        ((u32::from(old) * keep + u32::from(new) * (100 - keep)) / 100) as u8
    };
    RgbColor::new(mix(old.r, new.r), mix(old.g, new.g), mix(old.b, new.b))
}
