//! Typed pipeline parameters, their persisted form and hot-reload detection.

mod parameter;
mod source;

use std::{fmt, time::Duration, time::SystemTime};

pub use parameter::{Parameter, ParameterKind, ParameterSet, ParameterValue};
pub use source::{ConfigSource, MemorySettings, SettingsFile};

use crate::{driver::DriverHandle, observe::LogLevel, AtmoError, Result};

/// Edge length in pixels of one capture size tier.
pub const CAPTURE_TIER_PIXELS: u32 = 64;

/// Highest `analyze_size` tier honoured; larger values capture at this size.
pub const MAX_CAPTURE_TIER: u32 = 31;

/// Period of a cadence configured in milliseconds, at least one.
pub fn rate_period(rate: i64) -> Duration {
    Duration::from_millis(u64::try_from(rate).unwrap_or(0).max(1))
}

/// Parameter set as loaded from the persisted settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub parameters: ParameterSet,
    pub modified: SystemTime,
}

/// One changed parameter, old and new value in their textual encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterChange {
    pub parameter: Parameter,
    pub old: String,
    pub new: String,
}

impl fmt::Display for ParameterChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}': '{}' -> '{}'",
            self.parameter, self.old, self.new
        )
    }
}

/// Lists every parameter whose value differs between `old` and `new`.
pub fn diff(old: &ParameterSet, new: &ParameterSet) -> Vec<ParameterChange> {
    Parameter::ALL
        .iter()
        .filter_map(|&parameter| {
            let before = old.get(parameter);
            let after = new.get(parameter);
            if before == after {
                return None;
            }
            Some(ParameterChange {
                parameter,
                old: before.map(ToString::to_string).unwrap_or_default(),
                new: after.map(ToString::to_string).unwrap_or_default(),
            })
        })
        .collect()
}

/// Values derived from a parameter set that the schedulers run with.
///
/// Derived in exactly one place after every configuration change so that
/// capture size and cadence never drift between call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeParameters {
    pub capture_edge: u32,
    pub analyze_period: Duration,
    pub capture_wait: Duration,
}

impl RuntimeParameters {
    pub fn derive(parameters: &ParameterSet) -> Self {
        let tier = u32::try_from(parameters.int(Parameter::AnalyzeSize).max(0))
            .unwrap_or(u32::MAX)
            .min(MAX_CAPTURE_TIER);
        let analyze_period = rate_period(parameters.int(Parameter::AnalyzeRate));
        Self {
            capture_edge: (tier + 1) * CAPTURE_TIER_PIXELS,
            analyze_period,
            capture_wait: analyze_period,
        }
    }

    /// Capture dimensions for the given display aspect ratio. The longer side
    /// gets the tier edge, the other is rounded to the nearest pixel.
    pub fn capture_size(&self, aspect_ratio: f32) -> Option<(u32, u32)> {
        if aspect_ratio.is_nan() || aspect_ratio <= 0.0 || aspect_ratio.is_infinite() {
            return None;
        }
        let edge = self.capture_edge as f32;
        let size = if aspect_ratio >= 1.0 {
            (self.capture_edge, (edge / aspect_ratio).round() as u32)
        } else {
            ((edge * aspect_ratio).round() as u32, self.capture_edge)
        };
        Some((size.0.max(1), size.1.max(1)))
    }
}

/// Loads, applies and writes back the persisted parameters.
pub struct ParameterStore<S> {
    source: S,
    loaded: Option<SystemTime>,
}

impl<S: ConfigSource> ParameterStore<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            loaded: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_configured(&self) -> Result<bool> {
        Ok(self.source.modified()?.is_some())
    }

    /// Whether the persisted settings changed since the last load or write.
    pub fn has_changed(&self) -> Result<bool> {
        Ok(self.source.modified()? != self.loaded)
    }

    /// Parses the persisted settings without applying them.
    pub fn read(&self) -> Result<ConfigSnapshot> {
        let modified = self
            .source
            .modified()?
            .ok_or_else(|| AtmoError::configuration("settings are not configured"))?;
        let parameters = ParameterSet::from_settings(&self.source.read()?)?;
        Ok(ConfigSnapshot {
            parameters,
            modified,
        })
    }

    /// Reads the persisted settings and applies every value to `handle`.
    ///
    /// The whole load fails if the driver rejects any value, in which case
    /// the handle keeps its previous values. With `report_diff` only changed
    /// parameters are logged, otherwise every value is.
    pub fn load(&mut self, handle: &mut DriverHandle, report_diff: bool) -> Result<ConfigSnapshot> {
        let modified = self.source.modified()?;
        // Remember the timestamp even if applying fails, so a broken file is
        // reported once rather than on every poll.
        self.loaded = modified;
        let snapshot = self.read()?;
        let changes = handle.apply(&snapshot.parameters)?;

        let observer = handle.observer();
        if report_diff {
            for change in &changes {
                observer.log(LogLevel::Info, change.to_string());
            }
        } else {
            for (parameter, value) in snapshot.parameters.iter() {
                observer.log(LogLevel::Info, format!("parameter '{parameter}': '{value}'"));
            }
        }
        Ok(snapshot)
    }

    /// Writes the handle's effective values back, returning what changed
    /// relative to the persisted settings.
    pub fn persist(&mut self, handle: &DriverHandle) -> Result<Vec<ParameterChange>> {
        let effective = handle.parameters()?;
        let persisted = match self.source.modified()? {
            Some(_) => self.source.read()?,
            None => Default::default(),
        };

        let mut changes = Vec::new();
        for (parameter, value) in effective.iter() {
            let new = value.to_string();
            let old = persisted
                .get(parameter.name())
                .map(|text| text.trim().to_string());
            if old.as_deref() == Some(new.as_str()) {
                continue;
            }
            changes.push(ParameterChange {
                parameter,
                old: old.unwrap_or_default(),
                new,
            });
        }

        if !changes.is_empty() {
            self.source.write(&effective.to_settings())?;
            for change in &changes {
                handle.observer().log(LogLevel::Info, change.to_string());
            }
        }
        self.loaded = self.source.modified()?;
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_handle, settings_with};

    #[test]
    fn diff_of_a_set_with_itself_is_empty() {
        let defaults = ParameterSet::defaults();
        assert!(diff(&defaults, &defaults).is_empty());
    }

    #[test]
    fn diff_reports_old_and_new_text() {
        let old = ParameterSet::defaults();
        let mut new = old.clone();
        new.set(Parameter::Gamma, 25);
        new.set(Parameter::Center, true);

        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[0].to_string(),
            "parameter 'center': 'false' -> 'true'"
        );
        assert_eq!(changes[1].old, "10");
        assert_eq!(changes[1].new, "25");
    }

    #[test]
    fn load_then_diff_against_itself_is_idempotent() {
        let (mut handle, _) = fake_handle();
        let mut store = ParameterStore::new(settings_with(&[("top", "2"), ("gamma", "20")]));

        let snapshot = store.load(&mut handle, false).unwrap();
        let effective = handle.parameters().unwrap();

        assert!(diff(&snapshot.parameters, &effective).is_empty());
        assert!(handle.apply(&effective).unwrap().is_empty());
        assert!(!store.has_changed().unwrap());
    }

    #[test]
    fn rejected_value_leaves_previous_values_in_place() {
        let (mut handle, _) = fake_handle();
        let mut store = ParameterStore::new(settings_with(&[("top", "2")]));
        store.load(&mut handle, false).unwrap();

        // The fake driver only accepts up to 128 channels per border.
        store.source().update("left", "4").unwrap();
        store.source().update("right", "500").unwrap();
        let err = store.load(&mut handle, true).unwrap_err();

        assert!(err.is_configuration_error());
        let effective = handle.parameters().unwrap();
        assert_eq!(effective.int(Parameter::Top), 2);
        assert_eq!(effective.int(Parameter::Left), 0);
        assert_eq!(effective.int(Parameter::Right), 0);
        assert!(!store.has_changed().unwrap());
    }

    #[test]
    fn unconfigured_source_fails_to_load() {
        let (mut handle, _) = fake_handle();
        let mut store = ParameterStore::new(MemorySettings::new());

        let err = store.load(&mut handle, false).unwrap_err();
        assert!(format!("{err}").contains("not configured"));
    }

    #[test]
    fn persist_writes_back_clamped_values() {
        let (mut handle, _) = fake_handle();
        // The fake driver clamps the output rate to at least 10 ms on configure.
        let mut store = ParameterStore::new(settings_with(&[("top", "1"), ("output_rate", "2")]));
        store.load(&mut handle, false).unwrap();
        handle.configure().unwrap();

        let changes = store.persist(&handle).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_string(), "parameter 'output_rate': '2' -> '10'");
        assert_eq!(
            store.source().value("output_rate").unwrap().as_deref(),
            Some("10")
        );
        assert!(!store.has_changed().unwrap());
        assert!(store.persist(&handle).unwrap().is_empty());
    }

    #[test]
    fn derives_capture_size_from_aspect_ratio() {
        let mut parameters = ParameterSet::defaults();
        parameters.set(Parameter::AnalyzeSize, 1);
        let runtime = RuntimeParameters::derive(&parameters);

        assert_eq!(runtime.capture_edge, 128);
        assert_eq!(runtime.capture_size(16.0 / 9.0), Some((128, 72)));
        assert_eq!(runtime.capture_size(0.75), Some((96, 128)));
        assert_eq!(runtime.capture_size(2.35), Some((128, 54)));
        assert_eq!(runtime.capture_size(0.0), None);
    }

    #[test]
    fn derives_periods_from_rates() {
        let mut parameters = ParameterSet::defaults();
        parameters.set(Parameter::AnalyzeRate, 40);
        let runtime = RuntimeParameters::derive(&parameters);

        assert_eq!(runtime.analyze_period, Duration::from_millis(40));
        assert_eq!(runtime.capture_wait, Duration::from_millis(40));
        assert_eq!(rate_period(100), Duration::from_millis(100));
        assert_eq!(rate_period(0), Duration::from_millis(1));
        assert_eq!(rate_period(-5), Duration::from_millis(1));
    }

    #[test]
    fn oversized_analyze_size_is_capped() {
        let (mut handle, _) = fake_handle();
        let mut store = ParameterStore::new(settings_with(&[("analyze_size", "67108864")]));
        store.load(&mut handle, false).unwrap();
        handle.configure().unwrap();

        let runtime = RuntimeParameters::derive(&handle.parameters().unwrap());
        assert_eq!(runtime.capture_edge, (MAX_CAPTURE_TIER + 1) * CAPTURE_TIER_PIXELS);
        assert_eq!(runtime.capture_size(16.0 / 9.0), Some((2048, 1152)));

        let mut parameters = ParameterSet::defaults();
        parameters.set(Parameter::AnalyzeSize, i64::MAX);
        assert_eq!(RuntimeParameters::derive(&parameters).capture_edge, 2048);
        parameters.set(Parameter::AnalyzeSize, -3);
        assert_eq!(RuntimeParameters::derive(&parameters).capture_edge, CAPTURE_TIER_PIXELS);
    }
}
