use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    time::Instant,
};

use atmo_core::{
    AtmoError, ColorFrame, OutputDriver, Parameter, ParameterSet, Result, ZoneLayout,
};

/// Writes every frame as human readable per-zone lines appended to a file.
///
/// `driver_param` names the file; `default_path` is used when it is empty.
pub struct FileOutput {
    default_path: &'static str,
    path: PathBuf,
    file: Option<File>,
    layout: ZoneLayout,
    opened_at: Instant,
    last: Option<ColorFrame>,
}

impl FileOutput {
    pub fn new(default_path: &'static str) -> Self {
        Self {
            default_path,
            path: PathBuf::from(default_path),
            file: None,
            layout: ZoneLayout::default(),
            opened_at: Instant::now(),
            last: None,
        }
    }

    fn write_frame(&mut self, colors: &ColorFrame) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AtmoError::driver(format!("file {} is not open", self.path.display())))?;

        let mut text = format!("{:16.3}    R   G   B\n", self.opened_at.elapsed().as_secs_f64());
        let mut colors = colors.colors().iter();
        for (zone, channels) in self.layout.zones() {
            for channel in 1..=channels {
                let Some(color) = colors.next() else {
                    break;
                };
                text.push_str(&format!(
                    "{:>12}[{:02}]: {:03} {:03} {:03}\n",
                    zone.name(),
                    channel,
                    color.r,
                    color.g,
                    color.b
                ));
            }
        }

        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| {
                AtmoError::driver(format!(
                    "Writing to file {} fails: {err}",
                    self.path.display()
                ))
            })
    }
}

impl OutputDriver for FileOutput {
    fn open(&mut self, parameters: &ParameterSet) -> Result<()> {
        self.layout = ZoneLayout::from_parameters(parameters);
        self.last = None;
        self.path = match parameters.text(Parameter::DriverParam).trim() {
            "" => PathBuf::from(self.default_path),
            path => PathBuf::from(path),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                AtmoError::driver(format!("Opening file {} fails: {err}", self.path.display()))
            })?;
        self.file = Some(file);
        self.opened_at = Instant::now();
        tracing::info!(path = %self.path.display(), "output file opened");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.last = None;
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|err| {
                AtmoError::driver(format!("Closing file {} fails: {err}", self.path.display()))
            })?;
        }
        Ok(())
    }

    fn instant_configure(&mut self, _parameters: &ParameterSet) -> Result<()> {
        Ok(())
    }

    fn output_colors(&mut self, colors: &ColorFrame) -> Result<()> {
        if self.last.as_ref() == Some(colors) {
            return Ok(());
        }
        self.last = None;
        self.write_frame(colors)?;
        self.last = Some(colors.clone());
        Ok(())
    }

    fn turn_lights_off(&mut self) -> Result<()> {
        self.output_colors(&ColorFrame::black(self.layout.total()))
    }
}
