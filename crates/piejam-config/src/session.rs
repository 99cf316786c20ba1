//! `load_session`/`save_session`: opaque, generic over whatever snapshot
//! type the caller's reducer/domain state serializes to. This crate never
//! parses session contents itself — per distilled §6 ("the engine never
//! parses these itself") and SPEC_FULL.md's Non-goals (no end-user file
//! format is specified), `Session<T>` is a thin envelope around a
//! caller-supplied payload `T`, versioned so a future format change can be
//! detected without this crate knowing what `T` actually contains.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// The current envelope format version, bumped whenever the envelope shape
/// itself (not the payload) changes.
pub const SESSION_FORMAT_VERSION: u32 = 1;

/// A versioned wrapper around a caller-owned session payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session<T> {
    /// Envelope format version this session was saved with.
    pub format_version: u32,
    /// The caller's own serializable state snapshot.
    pub payload: T,
}

impl<T> Session<T> {
    /// Wraps `payload` at the current format version.
    pub fn new(payload: T) -> Self {
        Self {
            format_version: SESSION_FORMAT_VERSION,
            payload,
        }
    }
}

/// Loads and deserializes a session from `path`. # Errors Returns
/// [`ConfigError::ReadFile`] if `path` can't be read, or
/// [`ConfigError::TomlParse`] if its contents aren't a valid `Session<T>`.
pub fn load_session<T: DeserializeOwned>(path: &Path) -> crate::Result<Session<T>> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::toml_parse(path, e))
}

/// Serializes `payload` and writes it to `path`, creating parent directories
/// as needed. # Errors Returns [`ConfigError::TomlSerialize`] if `payload`
/// can't be represented in TOML, [`ConfigError::CreateDir`] if its parent
/// directory can't be created, or [`ConfigError::WriteFile`] if the write
/// itself fails.
pub fn save_session<T: Serialize>(path: &Path, payload: T) -> crate::Result<()> {
    let session = Session::new(payload);
    let serialized =
        toml::to_string_pretty(&session).map_err(|e| ConfigError::toml_serialize(path, e))?;
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }
    std::fs::write(path, serialized).map_err(|e| ConfigError::write_file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct DemoPayload {
        sample_rate: u32,
        channel_names: Vec<String>,
    }

    #[test]
    fn save_then_load_round_trips_the_payload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sessions/demo.toml");
        let payload = DemoPayload {
            sample_rate: 48_000,
            channel_names: vec!["Kick".into(), "Snare".into()],
        };

        save_session(&path, payload.clone()).unwrap();
        let loaded: Session<DemoPayload> = load_session(&path).unwrap();

        assert_eq!(loaded.format_version, SESSION_FORMAT_VERSION);
        assert_eq!(loaded.payload, payload);
    }

    #[test]
    fn save_session_creates_missing_parent_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/c/demo.toml");
        save_session(
            &path,
            DemoPayload {
                sample_rate: 44_100,
                channel_names: vec![],
            },
        )
        .unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn load_session_on_missing_file_reports_read_error() {
        let result: crate::Result<Session<DemoPayload>> =
            load_session(Path::new("/nonexistent/piejam/session.toml"));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
