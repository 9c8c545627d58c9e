//! Startup configuration.
//!
//! One YAML file read once at startup. Every key has a default so a
//! partial file works, but a *missing* file is fatal: the console refuses
//! to guess where logs, plugins and resources live.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    Unreadable(std::io::Error),
    Parse(serde_yaml::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Missing(path) => {
                write!(f, "configuration file not found: {}", path)
            }
            ConfigError::Unreadable(err) => write!(f, "cannot read configuration: {}", err),
            ConfigError::Parse(err) => write!(f, "bad configuration: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub refresh: RefreshConfig,
    /// Frames past this much used memory (KB) paint as warnings.
    pub memory_warning_level: u64,
    pub style: StyleConfig,
    pub paths: PathsConfig,
    pub render_logs: RenderLogsConfig,
    pub output_viewers: Vec<OutputViewer>,
    pub resources: ResourcesConfig,
    pub allowed_tags: Vec<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            refresh: RefreshConfig::default(),
            memory_warning_level: 5 * 1024 * 1024,
            style: StyleConfig::default(),
            paths: PathsConfig::default(),
            render_logs: RenderLogsConfig::default(),
            output_viewers: Vec::new(),
            resources: ResourcesConfig::default(),
            allowed_tags: vec![
                "general".to_string(),
                "desktop".to_string(),
                "playblast".to_string(),
                "util".to_string(),
            ],
        }
    }
}

/// Per-tree refresh delays, milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub job_update_delay: u64,
    pub jobs_update_delay: u64,
    pub frame_update_delay: u64,
    pub layer_update_delay: u64,
    pub host_update_delay: u64,
    pub proc_update_delay: u64,
    pub min_update_interval: u64,
    pub after_action_update_delay: u64,
}

impl Default for RefreshConfig {
    fn default() -> RefreshConfig {
        RefreshConfig {
            job_update_delay: 10_000,
            jobs_update_delay: 20_000,
            frame_update_delay: 10_000,
            layer_update_delay: 10_000,
            host_update_delay: 20_000,
            proc_update_delay: 22_000,
            min_update_interval: 5_000,
            after_action_update_delay: 2_000,
        }
    }
}

impl RefreshConfig {
    /// Delay after a menu action before the coalesced refresh fires.
    pub fn after_action_delay(&self) -> Duration {
        Duration::from_millis(self.after_action_update_delay)
    }

    pub fn interval_ticks(delay_ms: u64) -> u32 {
        (delay_ms / 1000).max(1) as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub colors: ColorsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// RGB per frame state name.
    pub frame_state: std::collections::BTreeMap<String, [u8; 3]>,
    /// The 15 user-assignable background slots.
    pub background: Vec<[u8; 3]>,
}

impl Default for ColorsConfig {
    fn default() -> ColorsConfig {
        let mut frame_state = std::collections::BTreeMap::new();
        frame_state.insert("Waiting".to_string(), [250, 250, 100]);
        frame_state.insert("Setup".to_string(), [160, 160, 160]);
        frame_state.insert("Running".to_string(), [100, 200, 245]);
        frame_state.insert("Succeeded".to_string(), [55, 200, 55]);
        frame_state.insert("Dead".to_string(), [255, 65, 60]);
        frame_state.insert("Eaten".to_string(), [150, 0, 0]);
        frame_state.insert("Depend".to_string(), [160, 32, 240]);
        frame_state.insert("Checkpoint".to_string(), [61, 98, 247]);
        ColorsConfig {
            frame_state,
            background: vec![
                [200, 60, 60],
                [160, 32, 240],
                [60, 60, 160],
                [60, 160, 160],
                [60, 160, 60],
                [160, 160, 60],
                [160, 100, 60],
                [160, 60, 60],
                [100, 100, 100],
                [48, 48, 120],
                [120, 48, 120],
                [48, 120, 120],
                [48, 120, 48],
                [120, 120, 48],
                [120, 80, 48],
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub resources: String,
    pub config: String,
    pub plugins: String,
}

impl Default for PathsConfig {
    fn default() -> PathsConfig {
        PathsConfig {
            resources: "~/.config/cuewatch/resources".to_string(),
            config: "~/.config/cuewatch".to_string(),
            plugins: "~/.config/cuewatch/plugins".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLogsConfig {
    pub root: RenderLogRoots,
    pub highlight: HighlightConfig,
}

impl Default for RenderLogsConfig {
    fn default() -> RenderLogsConfig {
        RenderLogsConfig {
            root: RenderLogRoots::default(),
            highlight: HighlightConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLogRoots {
    pub linux: String,
    pub windows: String,
    pub darwin: String,
}

impl Default for RenderLogRoots {
    fn default() -> RenderLogRoots {
        RenderLogRoots {
            linux: "/shots".to_string(),
            windows: "S:".to_string(),
            darwin: "/Volumes/shots".to_string(),
        }
    }
}

impl RenderLogRoots {
    pub fn for_this_os(&self) -> &str {
        #[cfg(target_os = "windows")]
        {
            &self.windows
        }
        #[cfg(target_os = "macos")]
        {
            &self.darwin
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            &self.linux
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub error: Vec<String>,
    pub warning: Vec<String>,
    pub info: Vec<String>,
}

impl Default for HighlightConfig {
    fn default() -> HighlightConfig {
        HighlightConfig {
            error: vec![
                "error".to_string(),
                "aborted".to_string(),
                "fatal".to_string(),
                "failed".to_string(),
                "killed".to_string(),
                "command not found".to_string(),
                "no licenses could be found".to_string(),
                "segmentation fault".to_string(),
            ],
            warning: vec!["warning".to_string(), "not found".to_string()],
            info: vec!["info:".to_string(), "rqd cmd:".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputViewer {
    pub action_text: String,
    pub cmd_pattern: String,
    pub extract_args_regex: Option<String>,
    pub stereo_modifiers: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub max_cores: u32,
    /// KB, for the memory dialogs' upper bound.
    pub max_memory: u64,
    pub redirect_wasted_cores_threshold: f32,
}

impl Default for ResourcesConfig {
    fn default() -> ResourcesConfig {
        ResourcesConfig {
            max_cores: 256,
            max_memory: 256 * 1024 * 1024,
            redirect_wasted_cores_threshold: 100.0,
        }
    }
}

impl Config {
    /// Load the startup configuration. A missing file aborts startup with
    /// a diagnostic rather than running on guesses.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path).map_err(ConfigError::Unreadable)?;
        serde_yaml::from_str(&text).map_err(ConfigError::Parse)
    }

    pub fn frame_state_color(&self, state: &str) -> Option<[u8; 3]> {
        self.style.colors.frame_state.get(state).copied()
    }
}
