//! Configuration for hostcare

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::diagnostics::policy::GIB;
use crate::diagnostics::Thresholds;
use crate::events::EventLog;
use crate::remediation::RemediationSettings;
use crate::scheduler::{default_tasks, ScheduledTask};

/// Global application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub remediation: RemediationConfig,
    pub cache: CacheConfig,
    pub collection: CollectionConfig,
    pub events: EventsConfig,
    pub schedule: ScheduleConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location. A missing
    /// default file means defaults; a missing explicit file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hostcare").join("config.toml"))
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.events.path.clone().unwrap_or_else(EventLog::default_path)
    }

    /// Daily log files, under the local data dir rather than the cache dir.
    pub fn log_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hostcare")
            .join("logs")
    }

    /// Files the tool writes itself, excluded from cache cleaning wherever
    /// the cache roots point.
    pub fn own_paths(&self) -> Vec<PathBuf> {
        vec![Self::log_dir(), self.event_log_path()]
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.collection.command_timeout_secs)
    }

    pub fn remediation_settings(&self) -> RemediationSettings {
        RemediationSettings {
            cpu_process_percent: self.remediation.cpu_process_percent,
            memory_process_percent: self.remediation.memory_process_percent,
            essential_processes: self.remediation.essential_processes.clone(),
            large_file_bytes: self.remediation.large_file_bytes,
            downloads_dir: self
                .remediation
                .downloads_dir
                .clone()
                .or_else(dirs::download_dir),
            cache_roots: self.cache.roots.clone(),
            timeout: Duration::from_secs(self.collection.timeout_secs),
            self_pid: std::process::id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    pub cpu_process_percent: f64,
    pub memory_process_percent: f64,
    /// Never offered for termination. Matched case-insensitively.
    pub essential_processes: Vec<String>,
    pub large_file_bytes: u64,
    pub downloads_dir: Option<PathBuf>,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            cpu_process_percent: 10.0,
            memory_process_percent: 5.0,
            essential_processes: default_essential_processes(),
            large_file_bytes: GIB,
            downloads_dir: None,
        }
    }
}

fn default_essential_processes() -> Vec<String> {
    [
        // macOS
        "Finder",
        "Dock",
        "SystemUIServer",
        "WindowServer",
        "loginwindow",
        "launchd",
        // Windows
        "explorer",
        "dwm",
        "winlogon",
        // Linux desktops
        "gnome-shell",
        "kwin_x11",
        "kwin_wayland",
        "Xorg",
        "Xwayland",
        "systemd",
        "init",
        // Shells
        "bash",
        "zsh",
        "fish",
        "sh",
        "hostcare",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub roots: Vec<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            roots: dirs::cache_dir().into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Bound on each sub-metric read.
    pub timeout_secs: u64,
    /// Bound on external commands and the vulnerability scan.
    pub command_timeout_secs: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            command_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EventsConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub tasks: Vec<ScheduledTask>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
        }
    }
}

/// Write the default configuration to `path`
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("Configuration already exists. Use --force to overwrite.");
    }

    Config::default().save(path)?;
    println!("Created {}", path.display());
    Ok(())
}
