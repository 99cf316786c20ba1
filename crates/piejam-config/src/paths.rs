//! Platform-specific paths for session files, recordings, and app config.
//!
//! # Directory structure
//!
//! - **Config dir**: `~/.config/piejam/` (Linux), `~/Library/Application
//!   Support/piejam/` (macOS), `%APPDATA%\piejam\` (Windows) — holds
//!   `app_config.toml` directly.
//! - **Sessions**: `<config dir>/sessions/`
//! - **Recordings**: `<config dir>/recordings/`

use std::path::PathBuf;

const APP_NAME: &str = "piejam";
const SESSIONS_SUBDIR: &str = "sessions";
const RECORDINGS_SUBDIR: &str = "recordings";
const APP_CONFIG_FILE: &str = "app_config.toml";

/// The user-specific configuration directory.
///
/// Returns a fallback path (`./.piejam`) if the platform config directory
/// cannot be determined, rather than panicking.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// The directory saved/loaded sessions live in.
pub fn sessions_dir() -> PathBuf {
    user_config_dir().join(SESSIONS_SUBDIR)
}

/// The directory captured recordings are written to.
pub fn recordings_dir() -> PathBuf {
    user_config_dir().join(RECORDINGS_SUBDIR)
}

/// The path `load_app_config`/`save_app_config` read and write.
pub fn app_config_path() -> PathBuf {
    user_config_dir().join(APP_CONFIG_FILE)
}

/// Resolves a session name to a full path under [`sessions_dir`].
///
/// Accepts an absolute/relative path as-is; otherwise treats `name` as a
/// bare session name and appends `.toml` if missing.
pub fn resolve_session_path(name: &str) -> PathBuf {
    let path = PathBuf::from(name);
    if path.is_absolute() || path.components().count() > 1 {
        return path;
    }
    let filename = if name.ends_with(".toml") {
        name.to_string()
    } else {
        format!("{name}.toml")
    };
    sessions_dir().join(filename)
}

/// Ensures `dir` exists, creating parents as needed.
pub fn ensure_dir(dir: &std::path::Path) -> crate::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| crate::ConfigError::create_dir(dir, e))?;
    }
    Ok(())
}

/// Lists every `.toml` file directly inside `dir` (non-recursive).
///
/// Returns an empty vector if `dir` doesn't exist or can't be read.
pub fn list_toml_files(dir: &std::path::Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn user_config_dir_contains_app_name() {
        let dir = user_config_dir();
        assert!(dir.to_string_lossy().contains("piejam"));
    }

    #[test]
    fn sessions_and_recordings_nest_under_config_dir() {
        assert!(sessions_dir().starts_with(user_config_dir()));
        assert!(recordings_dir().starts_with(user_config_dir()));
    }

    #[test]
    fn resolve_session_path_adds_extension_for_bare_names() {
        let path = resolve_session_path("my_song");
        assert_eq!(path.file_name().unwrap(), "my_song.toml");
        assert!(path.starts_with(sessions_dir()));
    }

    #[test]
    fn resolve_session_path_passes_through_explicit_paths() {
        let path = resolve_session_path("/tmp/foo/bar.toml");
        assert_eq!(path, PathBuf::from("/tmp/foo/bar.toml"));
    }

    #[test]
    fn list_toml_files_filters_by_extension() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.toml"), "").unwrap();
        std::fs::write(temp.path().join("b.toml"), "").unwrap();
        std::fs::write(temp.path().join("c.txt"), "").unwrap();

        let found = list_toml_files(temp.path());
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn list_toml_files_on_missing_dir_is_empty() {
        assert!(list_toml_files(&PathBuf::from("/nonexistent/piejam/path/xyz")).is_empty());
    }

    #[test]
    fn ensure_dir_creates_missing_directories() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b/c");
        assert!(!nested.exists());
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
