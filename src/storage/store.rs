// Libby Core - OverDrive Libby integration for calibre
// Copyright (C) 2025 Libby Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Preference persistence
//!
//! [`PreferenceStore`] owns the loaded [`Preferences`] and writes batches
//! back through a [`PreferenceBackend`]. The file backend keeps the same
//! JSON layout the plugin has always used (`plugins/overdrive_libby.json`
//! in the calibre configuration directory); the memory backend exists so
//! the save flow can be exercised without a filesystem.

use crate::error::{LibbyError, Result};
use crate::storage::preferences::Preferences;
use crate::storage::schema::{PrefKey, PrefValue, PLUGIN_NAME};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Environment variable overriding the preference file location
pub const PREFS_PATH_ENV: &str = "LIBBY_PREFS_PATH";

/// Where preference contents are kept
pub trait PreferenceBackend {
    /// Current contents, or `None` when nothing has been saved yet
    fn read(&self) -> Result<Option<String>>;

    /// Replace the contents; either fully applied or not at all
    fn write(&self, contents: &str) -> Result<()>;

    /// Human readable location for log output
    fn describe(&self) -> String;
}

/// JSON file on disk
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceBackend for JsonFileBackend {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // rename is atomic on the same filesystem
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory contents, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryContents>>,
}

#[derive(Debug, Default)]
struct MemoryContents {
    contents: Option<String>,
    fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents<S: Into<String>>(contents: S) -> Self {
        let backend = Self::new();
        backend.lock().contents = Some(contents.into());
        backend
    }

    pub fn contents(&self) -> Option<String> {
        self.lock().contents.clone()
    }

    /// Make every later write fail, as a full disk would
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryContents> {
        // A poisoned lock still holds consistent data: writes replace whole strings
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PreferenceBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.contents())
    }

    fn write(&self, contents: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(LibbyError::IoError(std::io::Error::new(
                ErrorKind::Other,
                "memory backend refuses writes",
            )));
        }
        inner.contents = Some(contents.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

/// A set of values to commit together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceBatch {
    values: BTreeMap<PrefKey, PrefValue>,
}

impl PreferenceBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<V: Into<PrefValue>>(&mut self, key: PrefKey, value: V) -> &mut Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn get(&self, key: PrefKey) -> Option<&PrefValue> {
        self.values.get(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PrefKey, &PrefValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Outcome of a committed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Keys written with their new value
    pub applied: Vec<PrefKey>,
    /// Keys whose value did not fit their kind; they kept the old value
    pub rejected: Vec<PrefKey>,
}

/// Process-wide preference store
pub struct PreferenceStore {
    backend: Box<dyn PreferenceBackend>,
    prefs: Preferences,
    /// Keys found in the file that this version does not know; written back untouched
    unknown: Map<String, Value>,
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("backend", &self.backend.describe())
            .field("prefs", &self.prefs)
            .finish()
    }
}

impl PreferenceStore {
    /// Create a store over `backend` and load it
    pub fn load(backend: Box<dyn PreferenceBackend>) -> Self {
        let mut store = Self {
            backend,
            prefs: Preferences::default(),
            unknown: Map::new(),
        };
        store.reload();
        store
    }

    /// Load the JSON file at `path`
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        Self::load(Box::new(JsonFileBackend::new(path)))
    }

    /// Load the plugin's usual preference file
    pub fn open_default() -> Self {
        Self::open(Self::default_path())
    }

    /// Empty in-memory store
    pub fn in_memory() -> Self {
        Self::load(Box::new(MemoryBackend::new()))
    }

    /// `$LIBBY_PREFS_PATH`, else `<config dir>/calibre/plugins/overdrive_libby.json`
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(PREFS_PATH_ENV) {
            return PathBuf::from(path);
        }
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("calibre");
        path.push("plugins");
        path.push(format!("{}.json", PLUGIN_NAME));
        path
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    /// Re-read the backend
    ///
    /// Never fails: missing contents, unreadable or corrupt files, and values
    /// of the wrong shape all fall back to defaults.
    pub fn reload(&mut self) -> &Preferences {
        let (prefs, unknown) = match self.backend.read() {
            Ok(Some(contents)) => parse_contents(&contents, &self.backend.describe()),
            Ok(None) => {
                debug!(
                    location = %self.backend.describe(),
                    "No preference file yet, using defaults"
                );
                (Preferences::default(), Map::new())
            }
            Err(e) => {
                warn!(
                    location = %self.backend.describe(),
                    error = %e,
                    "Could not read preferences, using defaults"
                );
                (Preferences::default(), Map::new())
            }
        };
        self.prefs = prefs;
        self.unknown = unknown;
        &self.prefs
    }

    /// Validate and commit a batch
    ///
    /// Values that do not fit their key's kind are dropped (the key keeps its
    /// previous value) and listed in the report. Everything else is written in
    /// one go; if the write fails nothing changes, in memory or on disk.
    ///
    /// # Errors
    /// `PreferenceStore` if the backend write fails
    pub fn save(&mut self, batch: PreferenceBatch) -> Result<BatchReport> {
        let (next, report) = self.merge(&batch);
        for key in &report.rejected {
            warn!(key = key.as_str(), value = ?batch.get(*key), "Rejected preference value");
        }

        let contents = serialize(&next, &self.unknown)?;
        self.backend.write(&contents).map_err(|e| {
            LibbyError::PreferenceStore(format!("{}: {}", self.backend.describe(), e))
        })?;

        self.prefs = next;
        info!(
            applied = report.applied.len(),
            rejected = report.rejected.len(),
            "Preferences saved"
        );
        Ok(report)
    }

    /// Values the store would hold after saving `batch`, without writing
    pub fn preview(&self, batch: &PreferenceBatch) -> Preferences {
        self.merge(batch).0
    }

    fn merge(&self, batch: &PreferenceBatch) -> (Preferences, BatchReport) {
        let mut next = self.prefs.clone();
        let mut report = BatchReport::default();
        for (key, value) in batch.iter() {
            if key.kind().accepts(value) {
                next.set(key, value.clone());
                report.applied.push(key);
            } else {
                report.rejected.push(key);
            }
        }
        (next, report)
    }
}

fn parse_contents(contents: &str, location: &str) -> (Preferences, Map<String, Value>) {
    let mut prefs = Preferences::default();
    let mut unknown = Map::new();

    let raw: Map<String, Value> = match serde_json::from_str(contents) {
        Ok(map) => map,
        Err(e) => {
            warn!(location, error = %e, "Preference file is not a JSON object, using defaults");
            return (prefs, unknown);
        }
    };

    for (name, raw_value) in raw {
        let Some(key) = PrefKey::parse(&name) else {
            unknown.insert(name, raw_value);
            continue;
        };
        match PrefValue::from_json(&raw_value) {
            Some(value) if key.kind().accepts(&value) => prefs.set(key, value),
            _ => warn!(
                key = key.as_str(),
                value = %raw_value,
                "Ignoring stored value, using default"
            ),
        }
    }

    (prefs, unknown)
}

fn serialize(prefs: &Preferences, unknown: &Map<String, Value>) -> Result<String> {
    // Sorted keys, like the host's own JSON config files
    let mut merged: BTreeMap<String, Value> = unknown
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(prefs.to_json_map());
    Ok(serde_json::to_string_pretty(&merged)?)
}
