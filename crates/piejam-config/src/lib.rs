//! Session and app-config persistence for the PieJam audio mixer
//! . Two distinct things live here: - [`session`] —
//! `load_session`/`save_session`, opaque and generic over whatever
//! domain-state snapshot the caller passes in. This crate never parses a
//! session's payload; it only wraps/unwraps a versioned envelope around it.
//! - [`app_config`] — `load_app_config`/`save_app_config`, a concrete
//! settings struct this crate *does* own (which sound card to open on
//! startup, default sample rate/period, MIDI auto-connect list). [`paths`]
//! resolves both to platform-specific directories the way the donor
//! workspace's own `paths` module does, renamed from `sonido` to `piejam`
//! and restructured around sessions/recordings rather than DSP effect
//! presets.

mod app_config;
mod error;
mod session;

/// Platform-specific paths for sessions, recordings, and app config.
pub mod paths;

pub use app_config::{load_app_config, save_app_config, AppConfig};
pub use error::ConfigError;
pub use session::{load_session, save_session, Session, SESSION_FORMAT_VERSION};

/// Convenience result type for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
