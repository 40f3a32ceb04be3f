use std::{collections::BTreeMap, fmt};

use crate::{observe::Observer, AtmoError, Result};

use super::{OutputDriver, OUTPUT_DRIVER_INTERFACE_VERSION};

/// Builds a scripted output driver instance.
pub type DriverFactory = Box<dyn Fn(&Observer) -> Result<Box<dyn OutputDriver>> + Send + Sync>;

/// Outcome of looking up a custom driver name.
pub enum Resolution {
    /// A scripted driver is registered under the name and reported the
    /// expected interface version.
    Scripted(Box<dyn OutputDriver>),
    /// Nothing is registered under the name; it identifies a native driver.
    Native(String),
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scripted(_) => f.write_str("Scripted(..)"),
            Self::Native(name) => f.debug_tuple("Native").field(name).finish(),
        }
    }
}

/// Scripted output drivers available to the pipeline, by name.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Observer) -> Result<Box<dyn OutputDriver>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Observer) -> Result<Box<dyn OutputDriver>> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Two-step lookup: a scripted driver registered under `name` wins,
    /// otherwise `name` is handed back as a native driver identifier.
    ///
    /// A registered driver that fails to instantiate or reports another
    /// interface version is a configuration error, not a fallback.
    pub fn resolve(&self, name: &str, observer: &Observer) -> Result<Resolution> {
        let Some(factory) = self.factories.get(name) else {
            return Ok(Resolution::Native(name.to_string()));
        };

        let driver = factory(observer).map_err(|err| {
            AtmoError::configuration(format!("Instantiating script custom driver fails: {err}"))
        })?;

        let version = driver.interface_version();
        if version != OUTPUT_DRIVER_INTERFACE_VERSION {
            return Err(AtmoError::configuration(format!(
                "Script custom driver '{name}' has wrong interface version {version}, \
                 expected {OUTPUT_DRIVER_INTERFACE_VERSION}"
            )));
        }
        Ok(Resolution::Scripted(driver))
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
