use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{wlog_debug, Error, Result};

pub const DEFAULT_REPORT_TITLE: &str = "Progress";
pub const DEFAULT_SHELL: &str = "sh";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Upper bound on concurrently dispatched phases; unset means the whole wave.
    pub max_parallel: Option<usize>,
    /// Per-phase execution timeout in seconds.
    pub phase_timeout_secs: Option<u64>,
    pub state_dir: Option<String>,
    pub report_title: Option<String>,
    /// Auto-confirm checkpoint tasks.
    #[serde(default)]
    pub trust: bool,
    pub shell: Option<String>,
}

impl Config {
    pub fn waveplan_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".waveplan"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::waveplan_dir()?.join("waveplan.toml"))
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::waveplan_dir()?.join("state")),
        }
    }

    /// Location of the state file for the plan with the given slug.
    pub fn state_path_for(&self, slug: &str) -> Result<PathBuf> {
        Ok(self.state_dir()?.join(format!("{}.state.json", slug)))
    }

    pub fn effective_report_title(&self) -> &str {
        self.report_title.as_deref().unwrap_or(DEFAULT_REPORT_TITLE)
    }

    pub fn effective_shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(DEFAULT_SHELL)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        wlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            wlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        if config.max_parallel == Some(0) {
            return Err(Error::Validation(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        wlog_debug!(
            "Config loaded: max_parallel={:?}, phase_timeout_secs={:?}, state_dir={:?}",
            config.max_parallel,
            config.phase_timeout_secs,
            config.state_dir
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                wlog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        wlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
