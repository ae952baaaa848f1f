//! Client configuration at ~/.config/sealcal/config.toml.
//!
//! Every key can be overridden with a `SEALCAL_`-prefixed environment
//! variable, e.g. `SEALCAL_LOCAL_ALARMS=false`.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CalendarError, CalendarResult};
use crate::time_zone::{local_time_zone, valid_time_zone};

static DEFAULT_CALENDAR_DIR: &str = "~/calendar";

fn default_calendar_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CALENDAR_DIR)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SealcalConfig {
    /// Directory holding the calendar files the reminder daemon reads.
    #[serde(default = "default_calendar_dir")]
    pub calendar_dir: PathBuf,

    /// IANA zone to display and schedule in. Defaults to the system zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    /// Schedule reminders locally.
    #[serde(default = "default_true")]
    pub local_alarms: bool,

    /// Running inside the mobile app host, which delivers reminders itself.
    #[serde(default)]
    pub app_host: bool,

    /// Calendar turned off by the administrator.
    #[serde(default)]
    pub calendar_disabled: bool,
}

impl Default for SealcalConfig {
    fn default() -> Self {
        SealcalConfig {
            calendar_dir: default_calendar_dir(),
            time_zone: None,
            local_alarms: true,
            app_host: false,
            calendar_disabled: false,
        }
    }
}

impl SealcalConfig {
    pub fn config_path() -> CalendarResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalendarError::Config("Could not determine config directory".into()))?
            .join("sealcal");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the config from its default location, creating a commented
    /// default file on first use.
    pub fn load() -> CalendarResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    /// Load the config from `path` (optional) overlaid with the environment.
    pub fn load_from(path: &Path) -> CalendarResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("SEALCAL").try_parsing(true))
            .build()
            .map_err(|e| CalendarError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalendarError::Config(e.to_string()))
    }

    /// `calendar_dir` with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.calendar_dir.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    /// The configured zone, falling back to the system zone.
    pub fn zone(&self) -> Tz {
        match &self.time_zone {
            Some(zone) => valid_time_zone(zone, None),
            None => local_time_zone(),
        }
    }

    pub fn save(&self, path: &Path) -> CalendarResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CalendarError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| CalendarError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalendarResult<()> {
        let contents = format!(
            "\
# sealcal configuration

# Where your calendar files live:
# calendar_dir = \"{DEFAULT_CALENDAR_DIR}\"

# Time zone for reminders (defaults to the system zone):
# time_zone = \"Europe/Berlin\"

# Show reminders on this machine:
# local_alarms = true
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalendarError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalendarError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}
