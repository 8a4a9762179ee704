// Local configuration for the annotator host.
//
// Config file: `~/.annotator/config.toml`
// Shared store: `~/.annotator/store.db` unless overridden.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use annotator_common::selector::SelectorBuilder;

use crate::coordinator::trajectory::DEFAULT_TRAJECTORY_CAP;
use crate::panel::PanelOptions;
use crate::retry::RetryPolicy;

/// Root directory for annotator state: `~/.annotator/`.
pub fn annotator_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".annotator"))
}

/// Path to the config file: `~/.annotator/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    annotator_dir().map(|d| d.join("config.toml"))
}

/// Default shared store location: `~/.annotator/store.db`.
pub fn default_store_path() -> Option<PathBuf> {
    annotator_dir().map(|d| d.join("store.db"))
}

// ── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnotatorConfig {
    /// Persistence service base URL.
    pub service_url: String,
    pub request_timeout_ms: u64,
    /// Shared store database; `~/.annotator/store.db` when unset.
    pub store_path: Option<PathBuf>,
    pub session: SessionConfig,
    pub capture: CaptureConfig,
    pub coordinator: CoordinatorConfig,
    pub channels: ChannelConfig,
    pub panel: PanelConfig,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8000".into(),
            request_timeout_ms: 10_000,
            store_path: None,
            session: SessionConfig::default(),
            capture: CaptureConfig::default(),
            coordinator: CoordinatorConfig::default(),
            channels: ChannelConfig::default(),
            panel: PanelConfig::default(),
        }
    }
}

impl AnnotatorConfig {
    /// Load from `~/.annotator/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.channels.retry_attempts,
            Duration::from_millis(self.channels.retry_delay_ms),
        )
    }

    pub fn panel_options(&self) -> PanelOptions {
        PanelOptions { retry: self.retry_policy(), suggestions: self.panel.request_suggestions }
    }

    pub fn selector_builder(&self) -> SelectorBuilder {
        SelectorBuilder::new(self.capture.context_chars)
    }

    pub fn resolved_store_path(&self) -> Option<PathBuf> {
        self.store_path.clone().or_else(default_store_path)
    }
}

/// Defaults used when a new session has to be created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Resume this session instead of the one in the shared store.
    pub id: Option<String>,
    pub expert_name: String,
    pub topic: String,
    pub research_goal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Characters of surrounding text kept on each side of a quote.
    pub context_chars: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { context_chars: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub trajectory_cap: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { trajectory_cap: DEFAULT_TRAJECTORY_CAP }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub capacity: usize,
    /// Total attempts for a transient failure, first try included.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { capacity: 64, retry_attempts: 2, retry_delay_ms: 25 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PanelConfig {
    /// Fetch suggestions before saving each highlight.
    pub request_suggestions: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self { request_suggestions: true }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
