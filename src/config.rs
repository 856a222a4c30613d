//! Configuration files.
//!
//! The global config holds channel tuning, adaptive defaults and profiles.
//! Each detected monitor additionally gets its own file under `monitors/`,
//! holding state that is learned or toggled at runtime: advertised color
//! modes, auto-mode switches and per-profile color overrides.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyzer::AdaptiveParams;
use crate::constants::{config as paths, ddc as ddc_tuning};
use crate::profile::{Profile, sort_for_matching};
use crate::vcp::ColorValue;

/// DDC channel tuning shared by all monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DdcSettings {
    pub retry_count: u32,
    pub sleep_multiplier: f64,
    pub command_timeout_secs: f64,
}

impl Default for DdcSettings {
    fn default() -> Self {
        Self {
            retry_count: ddc_tuning::DEFAULT_RETRY_COUNT,
            sleep_multiplier: ddc_tuning::DEFAULT_SLEEP_MULTIPLIER,
            command_timeout_secs: ddc_tuning::COMMAND_TIMEOUT.as_secs_f64(),
        }
    }
}

impl DdcSettings {
    pub fn channel_config(&self) -> crate::ddc::ChannelConfig {
        crate::ddc::ChannelConfig {
            retry_count: self.retry_count,
            sleep_multiplier: self.sleep_multiplier,
            command_timeout: std::time::Duration::from_secs_f64(
                self.command_timeout_secs.max(0.1),
            ),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ddc: DdcSettings,
    pub adaptive: AdaptiveParams,
    /// Master switch for window-driven profile switching.
    pub auto_profile: bool,
    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ddc: DdcSettings::default(),
            adaptive: AdaptiveParams::default(),
            auto_profile: true,
            profiles: vec![Profile {
                name: paths::DEFAULT_PROFILE.to_string(),
                ..Profile::default()
            }],
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::FILENAME);
        path
    }

    /// Loads the config, creating a default file on first run. Profiles are
    /// normalized for matching: sorted by priority with the default profile
    /// present and last.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, creating default");
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {path:?}"))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from {path:?}"))?;
        config.normalize();
        info!(profiles = config.profiles.len(), "loaded config");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {parent:?}"))?;
        }
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {path:?}"))?;
        Ok(())
    }

    /// Ensures the default profile exists and profiles are in matching
    /// order.
    pub fn normalize(&mut self) {
        if !self.profiles.iter().any(|p| p.is_default()) {
            self.profiles.push(Profile {
                name: paths::DEFAULT_PROFILE.to_string(),
                ..Profile::default()
            });
        }
        sort_for_matching(&mut self.profiles);
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

/// Runtime switches for one monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSwitches {
    pub brightness: bool,
    pub contrast: bool,
    /// Window-driven profile switching for this monitor.
    pub profile: bool,
    /// Only switch profiles for fullscreen windows.
    pub fullscreen_only: bool,
}

impl Default for AutoSwitches {
    fn default() -> Self {
        Self {
            brightness: false,
            contrast: false,
            profile: true,
            fullscreen_only: false,
        }
    }
}

/// Per-monitor state file, `monitors/<id>.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Color modes advertised by the display, cached from the capabilities
    /// query so the list survives restarts.
    pub color_modes: Vec<ColorModeEntry>,
    pub auto: AutoSwitches,
    /// Per-profile color override; takes precedence over the profile's own
    /// color on this monitor.
    pub profile_colors: HashMap<String, ColorValue>,
    /// Adaptive tuning override; `None` falls back to the global section.
    pub adaptive: Option<AdaptiveParams>,
    /// Features this panel rejected, kept so restarts skip the probe.
    pub unsupported_features: Vec<u8>,
    /// Last values seen on the hardware, keyed by feature name, written at
    /// shutdown for inspection and future sessions.
    pub last_settings: std::collections::BTreeMap<String, u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorModeEntry {
    pub value: ColorValue,
    pub label: String,
}

impl MonitorConfig {
    pub fn dir() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::MONITORS_DIR);
        path
    }

    pub fn path_for(id: &str) -> PathBuf {
        Self::dir().join(format!("{id}.toml"))
    }

    pub fn load_or_default(id: &str) -> Self {
        Self::load_from(&Self::path_for(id)).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        let contents = fs::read_to_string(path).ok()?;
        match toml::from_str(&contents) {
            Ok(cfg) => Some(cfg),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable monitor config");
                None
            }
        }
    }

    pub fn save(&self, id: &str) -> Result<()> {
        self.save_to(&Self::path_for(id))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create monitors directory {parent:?}"))?;
        }
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize monitor config")?;
        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write monitor config to {path:?}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileMatch;

    #[test]
    fn default_config_has_default_profile_last() {
        let mut config = Config::default();
        config.profiles.insert(
            0,
            Profile {
                name: "video".into(),
                priority: 5,
                matching: ProfileMatch {
                    window_class: vec!["mpv".into()],
                    window_title: Vec::new(),
                },
                ..Profile::default()
            },
        );
        config.normalize();
        assert_eq!(config.profiles.last().unwrap().name, "default");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.ddc.retry_count = 5;
        config.profiles.push(Profile {
            name: "movies".into(),
            priority: 3,
            settings: crate::profile::ProfileSettings {
                color: Some(ColorValue::DisplayMode(0x03)),
                brightness: Some(35),
                ..Default::default()
            },
            ..Profile::default()
        });
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.ddc.retry_count, 5);
        let movies = loaded.profile("movies").unwrap();
        assert_eq!(movies.settings.color, Some(ColorValue::DisplayMode(0x03)));
        assert_eq!(movies.settings.brightness, Some(35));
    }

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert!(config.auto_profile);
        assert_eq!(config.profiles.len(), 1);
    }

    #[test]
    fn monitor_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DELL_U2720Q_ABC123.toml");

        let mut mc = MonitorConfig::default();
        mc.auto.brightness = true;
        mc.color_modes.push(ColorModeEntry {
            value: ColorValue::ColorTemperature(0x05),
            label: "6500 K".into(),
        });
        mc.profile_colors
            .insert("movies".into(), ColorValue::DisplayMode(0x03));
        mc.unsupported_features.push(0x87);
        mc.save_to(&path).unwrap();

        let loaded = MonitorConfig::load_from(&path).unwrap();
        assert!(loaded.auto.brightness);
        assert!(!loaded.auto.contrast);
        assert_eq!(
            loaded.profile_colors["movies"],
            ColorValue::DisplayMode(0x03)
        );
        assert_eq!(
            loaded.color_modes[0].value,
            ColorValue::ColorTemperature(0x05)
        );
        assert_eq!(loaded.unsupported_features, vec![0x87]);
    }

    #[test]
    fn corrupt_monitor_config_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "auto = \"not a table\"").unwrap();
        assert!(MonitorConfig::load_from(&path).is_none());
    }
}
