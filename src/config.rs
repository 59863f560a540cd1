use anyhow::{Context, Result};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOG_FILE: &str = "logs.jsonl";
pub const JOBS_FILE: &str = "jobs.json";
/// Mirror directory created inside a workspace root.
pub const WORKSPACE_DIR: &str = ".timescope";

/// Options read from `config.toml`. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Canonical storage directory.
    pub storage_dir: Option<PathBuf>,
    /// Workspace root whose `.timescope/` holds the mirror log.
    pub workspace: Option<PathBuf>,
    /// Set to false to never write a mirror.
    pub mirror: bool,
    /// Elapsed-display refresh cadence, e.g. `1s`, `500ms`.
    pub refresh: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: None,
            workspace: None,
            mirror: true,
            refresh: "1s".to_string(),
        }
    }
}

/// Command-line overrides; `dir` also carries `TIMESCOPE_DIR`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dir: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub no_mirror: bool,
}

/// Resolved file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub storage_dir: PathBuf,
    pub log: PathBuf,
    pub jobs: PathBuf,
    pub mirrors: Vec<PathBuf>,
}

impl Paths {
    /// Canonical files under `dir`, with an optional workspace mirror.
    pub fn in_dir(dir: impl Into<PathBuf>, workspace: Option<&Path>) -> Self {
        let storage_dir = dir.into();
        Self {
            log: storage_dir.join(LOG_FILE),
            jobs: storage_dir.join(JOBS_FILE),
            mirrors: workspace
                .map(|root| root.join(WORKSPACE_DIR).join(LOG_FILE))
                .into_iter()
                .collect(),
            storage_dir,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("timescope").join("config.toml"))
    }

    /// Load from `path`, or from the default location. A missing file
    /// yields defaults; an unreadable or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        Self::from_toml(&raw)
            .with_context(|| format!("failed to parse config file at {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn refresh_interval(&self) -> Result<Duration> {
        humantime::parse_duration(self.refresh.trim())
            .with_context(|| format!("invalid refresh interval `{}`", self.refresh))
    }

    /// Apply overrides and defaults to get concrete paths.
    pub fn resolve(&self, overrides: &Overrides) -> Result<Paths> {
        let dir = match overrides.dir.as_ref().or(self.storage_dir.as_ref()) {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|d| d.join("timescope"))
                .context("could not determine a data directory; pass --dir")?,
        };
        let dir = absolute(&dir)?;

        let workspace = if overrides.no_mirror || !self.mirror {
            None
        } else {
            overrides
                .workspace
                .as_ref()
                .or(self.workspace.as_ref())
                .map(|w| absolute(w))
                .transpose()?
        };
        Ok(Paths::in_dir(dir, workspace.as_deref()))
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("cannot absolutize {}", path.display()))?
        .into_owned())
}
