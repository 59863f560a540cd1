use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::journal::ensure_parent;

/// Persisted set of job names, stored as a pretty-printed JSON list.
///
/// Listing order is byte-wise lexicographic, so case matters.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    path: PathBuf,
}

impl JobRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All job names, sorted. A missing file is an empty registry.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        Ok(self.load()?.into_iter().collect())
    }

    pub fn contains(&self, name: &str) -> StoreResult<bool> {
        Ok(self.load()?.contains(name))
    }

    /// Returns `false` if the name was already present.
    pub fn add(&self, name: &str) -> StoreResult<bool> {
        let mut jobs = self.load()?;
        if !jobs.insert(name.to_string()) {
            return Ok(false);
        }
        self.save(&jobs)?;
        Ok(true)
    }

    /// Returns `false` if `old` is not registered. If `new` already exists
    /// the two entries merge.
    pub fn rename(&self, old: &str, new: &str) -> StoreResult<bool> {
        let mut jobs = self.load()?;
        if !jobs.remove(old) {
            return Ok(false);
        }
        jobs.insert(new.to_string());
        self.save(&jobs)?;
        Ok(true)
    }

    /// Returns `false` if the name was not registered.
    pub fn delete(&self, name: &str) -> StoreResult<bool> {
        let mut jobs = self.load()?;
        if !jobs.remove(name) {
            return Ok(false);
        }
        self.save(&jobs)?;
        Ok(true)
    }

    fn load(&self) -> StoreResult<BTreeSet<String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(StoreError::read(&self.path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        let names: Vec<String> = serde_json::from_str(&raw).map_err(|source| StoreError::Registry {
            path: self.path.clone(),
            source,
        })?;
        Ok(names.into_iter().filter(|n| !n.is_empty()).collect())
    }

    fn save(&self, jobs: &BTreeSet<String>) -> StoreResult<()> {
        ensure_parent(&self.path)?;
        let names: Vec<&String> = jobs.iter().collect();
        let json = serde_json::to_string_pretty(&names).map_err(|source| StoreError::Registry {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json + "\n").map_err(|e| StoreError::write(&self.path, e))
    }
}
