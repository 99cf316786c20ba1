//! Error types for session/app-config persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during session/config persistence operations
/// .
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file.
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse TOML in '{path}': {source}")]
    TomlParse {
        /// Path of the file that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// Failed to serialize TOML.
    #[error("failed to serialize TOML for '{path}': {source}")]
    TomlSerialize {
        /// Path the value was being serialized for.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::ser::Error,
    },

    /// Failed to create a directory.
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Creates a read-file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Creates a write-file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Creates a create-directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }

    /// Creates a TOML-parse error.
    pub fn toml_parse(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        ConfigError::TomlParse {
            path: path.into(),
            source,
        }
    }

    /// Creates a TOML-serialize error.
    pub fn toml_serialize(path: impl Into<PathBuf>, source: toml::ser::Error) -> Self {
        ConfigError::TomlSerialize {
            path: path.into(),
            source,
        }
    }
}

/// Convenience result type for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
