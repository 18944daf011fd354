//! Provisioning Configuration
//!
//! Holds the named constants the pipelines work from:
//! - SDK root location and command-line tools archive
//! - AVD name, device profile and system image
//! - SDK packages to install
//! - Environment persistence and emulator launch switches

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use directories::ProjectDirs;
use tracing::{info, debug};

use crate::error::{DroidEnvError, Result};

/// Default system image, also installed as the last package
pub const DEFAULT_SYSTEM_IMAGE: &str = "system-images;android-33;google_apis_playstore;x86_64";

/// Default command-line tools build number
pub const DEFAULT_CMDLINE_TOOLS_VERSION: &str = "13114758";

/// Main provisioning configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// SDK root; relative paths are resolved against the home directory
    pub sdk_dir: PathBuf,
    /// Name of the virtual device
    pub avd_name: String,
    /// Hardware profile passed to `avdmanager --device`
    pub device_profile: String,
    /// System image the AVD boots
    pub system_image: String,
    /// SDK packages, installed in order
    pub packages: Vec<String>,
    /// Command-line tools build number (archive name and download URL)
    pub cmdline_tools_version: String,
    /// Command-line tools archive; defaults to the file next to the executable
    pub archive: Option<PathBuf>,
    /// Download the archive when it is not present locally
    pub download_missing_archive: bool,
    /// Expected SHA-256 of the archive, hex encoded
    pub archive_sha256: Option<String>,
    /// Line fed to the license prompts
    pub license_answer: String,
    /// Persist ANDROID_HOME / ANDROID_SDK_ROOT / PATH for future sessions
    pub persist_environment: bool,
    /// Launch the emulator at the end of provisioning
    pub launch_emulator: bool,
    /// Profile script used to persist variables on non-Windows hosts
    pub env_profile: Option<PathBuf>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            sdk_dir: PathBuf::from(".android_sdk"),
            avd_name: "iphone".to_string(),
            device_profile: "pixel".to_string(),
            system_image: DEFAULT_SYSTEM_IMAGE.to_string(),
            packages: vec![
                "platforms;android-33".to_string(),
                "build-tools;33.0.2".to_string(),
                "platform-tools".to_string(),
                "emulator".to_string(),
                DEFAULT_SYSTEM_IMAGE.to_string(),
            ],
            cmdline_tools_version: DEFAULT_CMDLINE_TOOLS_VERSION.to_string(),
            archive: None,
            download_missing_archive: false,
            archive_sha256: None,
            license_answer: "y".to_string(),
            persist_environment: true,
            launch_emulator: true,
            env_profile: None,
        }
    }
}

impl ProvisionConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droidenv", "droidenv")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the per-user config file is
    /// read when present and the defaults are used otherwise.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(DroidEnvError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Self::from_file(path).await?
            }
            None => match Self::config_file().filter(|p| p.exists()) {
                Some(file) => Self::from_file(&file).await?,
                None => {
                    info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.validate()?;
        Ok(config)
    }

    async fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&contents)
    }

    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reject values the pipelines cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.avd_name.trim().is_empty() {
            return Err(DroidEnvError::Config("avd_name must not be empty".into()));
        }
        if self.avd_name.contains(['/', '\\']) {
            return Err(DroidEnvError::Config(format!(
                "avd_name '{}' must not contain path separators",
                self.avd_name
            )));
        }
        if self.sdk_dir.as_os_str().is_empty() {
            return Err(DroidEnvError::Config("sdk_dir must not be empty".into()));
        }
        if let Some(empty) = self.packages.iter().position(|p| p.trim().is_empty()) {
            return Err(DroidEnvError::Config(format!("packages[{}] is empty", empty)));
        }
        if self.license_answer.trim().is_empty() {
            return Err(DroidEnvError::Config("license_answer must not be empty".into()));
        }
        Ok(())
    }
}
