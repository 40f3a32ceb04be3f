use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use crate::{error::lock, Result};

/// Persisted flat `name -> text` settings with an externally visible
/// modification time.
pub trait ConfigSource: Send {
    /// Modification time of the persisted settings, `None` when nothing has
    /// been persisted yet.
    fn modified(&self) -> Result<Option<SystemTime>>;

    fn read(&self) -> Result<BTreeMap<String, String>>;

    fn write(&mut self, settings: &BTreeMap<String, String>) -> Result<()>;
}

/// Settings stored as a JSON object on disk.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for SettingsFile {
    fn modified(&self) -> Result<Option<SystemTime>> {
        match fs::metadata(&self.path) {
            Ok(metadata) => Ok(Some(metadata.modified()?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write(&mut self, settings: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// In-process settings shared between clones. Every mutation advances the
/// modification time, so a change is always observable by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    shared: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    values: BTreeMap<String, String>,
    modified: Option<SystemTime>,
}

impl MemoryState {
    fn touch(&mut self) {
        let now = SystemTime::now();
        self.modified = Some(match self.modified {
            Some(previous) if previous >= now => previous + Duration::from_millis(1),
            _ => now,
        });
    }
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: BTreeMap<String, String>) -> Self {
        let settings = Self::default();
        if let Ok(mut state) = settings.shared.lock() {
            state.values = values;
            state.touch();
        }
        settings
    }

    /// Changes one value as an external editor would.
    pub fn update(&self, name: &str, value: impl Into<String>) -> Result<()> {
        let mut state = lock(&self.shared, "memory settings")?;
        state.values.insert(name.to_string(), value.into());
        state.touch();
        Ok(())
    }

    pub fn value(&self, name: &str) -> Result<Option<String>> {
        let state = lock(&self.shared, "memory settings")?;
        Ok(state.values.get(name).cloned())
    }
}

impl ConfigSource for MemorySettings {
    fn modified(&self) -> Result<Option<SystemTime>> {
        Ok(lock(&self.shared, "memory settings")?.modified)
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        Ok(lock(&self.shared, "memory settings")?.values.clone())
    }

    fn write(&mut self, settings: &BTreeMap<String, String>) -> Result<()> {
        let mut state = lock(&self.shared, "memory settings")?;
        state.values = settings.clone();
        state.touch();
        Ok(())
    }
}
