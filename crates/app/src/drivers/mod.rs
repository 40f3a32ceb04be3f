//! Drivers shipped with the command line service.

mod file;
mod mean;

pub use mean::MeanDriver;

use atmo_core::{DriverRegistry, OutputDriver};

use self::file::FileOutput;

/// Name of the scripted example driver in [`registry`].
pub const FILE_SCRIPT_DRIVER: &str = "mydriver";

/// Scripted output drivers selectable through `custom_driver`.
pub fn registry() -> DriverRegistry {
    DriverRegistry::new().with(FILE_SCRIPT_DRIVER, |_| {
        Ok(Box::new(FileOutput::new("mydriver.out")) as Box<dyn OutputDriver>)
    })
}
