//! Error types for droidenv
//!
//! Centralized error handling using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for droidenv
#[derive(Error, Debug)]
pub enum DroidEnvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine the current user's home directory")]
    HomeNotFound,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command-line tools archive not found: {0}")]
    ArchiveMissing(PathBuf),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Download error: {0}")]
    Download(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to create AVD '{name}': {reason}")]
    AvdCreation { name: String, reason: String },

    #[error("Environment error: {0}")]
    Env(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Result type alias for droidenv operations
pub type Result<T> = std::result::Result<T, DroidEnvError>;

impl DroidEnvError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            DroidEnvError::Io(e) => format!("File operation failed: {}", e),
            DroidEnvError::CommandFailed { stderr, .. } if !stderr.trim().is_empty() => {
                format!("{}\n{}", self, stderr.trim())
            }
            DroidEnvError::ArchiveMissing(path) => format!(
                "Command-line tools archive not found at {}. Place it there or enable download_missing_archive.",
                path.display()
            ),
            DroidEnvError::Download(msg) => format!("Download failed: {}. Please check your connection.", msg),
            _ => self.to_string(),
        }
    }
}
