//! `load_app_config`/`save_app_config`: the app's own persisted settings —
//! unlike [`crate::session`], this crate owns the concrete shape, since app
//! config (which sound card to open, default sample rate, MIDI auto-connect
//! list) is the application's own concern rather than an opaque domain-state
//! snapshot.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths::app_config_path;

/// Persisted application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sound-card device path to open on startup, if any.
    pub sound_card_path: Option<String>,
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Requested period size in frames.
    pub period_frames: u32,
    /// `(client, port)` pairs to auto-connect as MIDI inputs on startup.
    pub midi_auto_connect: Vec<(u32, u32)>,
    /// Session file to load automatically on startup, if any (distilled
    /// §6 action surface "`InitiateStartupSession`").
    pub startup_session: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sound_card_path: None,
            sample_rate: 48_000,
            period_frames: 256,
            midi_auto_connect: Vec::new(),
            startup_session: None,
        }
    }
}

/// Loads the app config from its well-known path
/// ([`crate::paths::app_config_path`]), or returns [`AppConfig::default`]
/// if no config file exists yet.
///
/// # Errors
///
/// Returns [`ConfigError::TomlParse`] if an existing config file isn't
/// valid TOML.
pub fn load_app_config() -> crate::Result<AppConfig> {
    let path = app_config_path();
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents =
        std::fs::read_to_string(&path).map_err(|e| ConfigError::read_file(&path, e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::toml_parse(&path, e))
}

/// Saves `config` to its well-known path, creating parent directories as
/// needed.
///
/// # Errors
///
/// Returns [`ConfigError::TomlSerialize`]/[`ConfigError::CreateDir`]/
/// [`ConfigError::WriteFile`] on failure.
pub fn save_app_config(config: &AppConfig) -> crate::Result<()> {
    let path = app_config_path();
    let serialized =
        toml::to_string_pretty(config).map_err(|e| ConfigError::toml_serialize(&path, e))?;
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }
    std::fs::write(&path, serialized).map_err(|e| ConfigError::write_file(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_app_config_matches_distilled_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.period_frames, 256);
        assert!(config.midi_auto_connect.is_empty());
    }

    #[test]
    fn app_config_round_trips_through_toml() {
        let config = AppConfig {
            sound_card_path: Some("hw:0".into()),
            sample_rate: 44_100,
            period_frames: 128,
            midi_auto_connect: vec![(1, 0), (2, 3)],
            startup_session: Some("last_session".into()),
        };
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed, config);
    }
}
