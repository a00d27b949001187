//! Check-in configuration loading
//!
//! Loads configuration from `~/.config/checkin/checkin.toml` (or the file
//! named by `CHECKIN_CONFIG`). A missing file means defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::attendee::IdConvention;
use crate::ledger::DuplicatePolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration for the check-in service.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CheckinConfig {
    /// Directory holding `attendees.json` and `scans.json`
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Canonical numeric id width; 0 selects free-form ids
    #[serde(default = "default_id_width")]
    pub id_width: usize,

    /// Which scans the ledger refuses to store twice
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Highest valid event day
    #[serde(default = "default_event_days")]
    pub event_days: u32,

    /// Default size of the recent-scans feed
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Service socket; `None` uses the runtime directory
    #[serde(default)]
    pub socket_path: Option<String>,
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|d| d.join("checkin").to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkin-data".to_string())
}

fn default_id_width() -> usize {
    4
}

fn default_event_days() -> u32 {
    3
}

fn default_recent_limit() -> usize {
    20
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            id_width: default_id_width(),
            duplicate_policy: DuplicatePolicy::default(),
            event_days: default_event_days(),
            recent_limit: default_recent_limit(),
            socket_path: None,
        }
    }
}

impl CheckinConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "CHECKIN_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "checkin.toml";

    const MAX_ID_WIDTH: usize = 12;

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `CHECKIN_CONFIG` environment variable
    /// 2. `~/.config/checkin/checkin.toml`
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(path = %path.display(), "check-in config not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let cfg: CheckinConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("checkin")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_days == 0 {
            return Err(ConfigError::Invalid("event_days must be at least 1".to_string()));
        }
        if self.recent_limit == 0 {
            return Err(ConfigError::Invalid(
                "recent_limit must be at least 1".to_string(),
            ));
        }
        if self.id_width > Self::MAX_ID_WIDTH {
            return Err(ConfigError::Invalid(format!(
                "id_width {} exceeds {}",
                self.id_width,
                Self::MAX_ID_WIDTH
            )));
        }
        Ok(())
    }

    pub fn id_convention(&self) -> IdConvention {
        IdConvention::from_width(self.id_width)
    }

    /// Data directory with `~/` expanded.
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Configured socket path with `~/` expanded, if one was set.
    pub fn resolved_socket_path(&self) -> Option<PathBuf> {
        self.socket_path.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}
