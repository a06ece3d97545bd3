use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Persisted key for the default group's uuid.
pub const PREF_DEFAULT_GROUP_ID: &str = "default-group-uuid";
/// Persisted key for the default group's name.
pub const PREF_DEFAULT_GROUP_NAME: &str = "default-group-name";

#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Preference store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Preference store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value store surviving process restarts; the subsystem equivalent of
/// shared user defaults. Writes are buffered until `synchronize`.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn synchronize(&self) -> Result<(), PreferenceError>;
}

pub struct FilePreferenceStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FilePreferenceStore {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PreferenceError> {
        let path = path.as_ref().to_path_buf();
        let values = match path.try_exists()? {
            true => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
            false => HashMap::new(),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn synchronize(&self) -> Result<(), PreferenceError> {
        let serialized = serde_json::to_string_pretty(&*self.values.lock().unwrap())?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }
}

/// Volatile store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn synchronize(&self) -> Result<(), PreferenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        let store = FilePreferenceStore::load(&path).unwrap();
        store.set(PREF_DEFAULT_GROUP_NAME, "Default");
        store.synchronize().unwrap();

        let reopened = FilePreferenceStore::load(&path).unwrap();
        assert_eq!(
            reopened.get(PREF_DEFAULT_GROUP_NAME).as_deref(),
            Some("Default")
        );
        assert_eq!(reopened.get(PREF_DEFAULT_GROUP_ID), None);
    }
}
