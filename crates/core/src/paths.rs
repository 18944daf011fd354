//! SDK and AVD path layout
//!
//! Everything the pipelines touch is derived from the user's home directory
//! and the provisioning config. Pure computation, no filesystem access.

use std::path::{Path, PathBuf};

use crate::config::ProvisionConfig;
use crate::error::{DroidEnvError, Result};

/// File avdmanager and the emulator use to remember the quick-boot choice
pub const QUICKBOOT_CHOICE_FILE: &str = "quickbootChoice.ini";

/// Canonical command-line tools directory name under `cmdline-tools/`
pub const CANONICAL_TOOLS_DIR: &str = "latest";

/// Resolve the current user's home directory
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(DroidEnvError::HomeNotFound)
}

/// Host OS tag used in command-line tools archive names
pub fn host_os_tag() -> &'static str {
    if cfg!(windows) {
        "win"
    } else if cfg!(target_os = "macos") {
        "mac"
    } else {
        "linux"
    }
}

fn script_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.bat", name)
    } else {
        name.to_string()
    }
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Resolved paths for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkLayout {
    pub home: PathBuf,
    pub sdk_root: PathBuf,
    /// `<sdk>/cmdline-tools`
    pub cmdline_tools_root: PathBuf,
    /// `<sdk>/cmdline-tools/latest`
    pub tools_latest: PathBuf,
    /// `<sdk>/cmdline-tools/latest/bin`
    pub tools_bin: PathBuf,
    pub sdkmanager: PathBuf,
    pub avdmanager: PathBuf,
    pub emulator_dir: PathBuf,
    pub emulator: PathBuf,
    pub platform_tools: PathBuf,
    pub adb: PathBuf,
    pub licenses_dir: PathBuf,
    /// `<home>/.android/avd`
    pub avd_home: PathBuf,
    /// `<avd home>/<name>.avd`
    pub avd_dir: PathBuf,
    /// `<avd home>/<name>.ini`
    pub avd_ini: PathBuf,
    pub quickboot_file: PathBuf,
    /// Command-line tools archive to extract
    pub archive: PathBuf,
    /// Profile script for the persisted environment on non-Windows hosts
    pub env_profile: PathBuf,
}

impl SdkLayout {
    /// Derive every path from `home` and `config`
    pub fn resolve(home: &Path, config: &ProvisionConfig) -> Self {
        let sdk_root = home.join(&config.sdk_dir);
        let cmdline_tools_root = sdk_root.join("cmdline-tools");
        let tools_latest = cmdline_tools_root.join(CANONICAL_TOOLS_DIR);
        let tools_bin = tools_latest.join("bin");
        let emulator_dir = sdk_root.join("emulator");
        let platform_tools = sdk_root.join("platform-tools");
        let avd_home = home.join(".android").join("avd");
        let avd_dir = avd_home.join(format!("{}.avd", config.avd_name));

        let archive = config
            .archive
            .clone()
            .unwrap_or_else(|| bundled_archive_dir().join(archive_file_name(&config.cmdline_tools_version)));

        Self {
            sdkmanager: tools_bin.join(script_name("sdkmanager")),
            avdmanager: tools_bin.join(script_name("avdmanager")),
            emulator: emulator_dir.join(exe_name("emulator")),
            adb: platform_tools.join(exe_name("adb")),
            licenses_dir: sdk_root.join("licenses"),
            avd_ini: avd_home.join(format!("{}.ini", config.avd_name)),
            quickboot_file: avd_dir.join(QUICKBOOT_CHOICE_FILE),
            env_profile: config
                .env_profile
                .clone()
                .unwrap_or_else(|| home.join(".android_sdk_env")),
            home: home.to_path_buf(),
            sdk_root,
            cmdline_tools_root,
            tools_latest,
            tools_bin,
            emulator_dir,
            platform_tools,
            avd_home,
            avd_dir,
            archive,
        }
    }

    /// PATH entries added by provisioning, in order
    pub fn path_additions(&self) -> Vec<PathBuf> {
        vec![
            self.tools_bin.clone(),
            self.platform_tools.clone(),
            self.emulator_dir.clone(),
        ]
    }
}

/// `commandlinetools-<os>-<version>_latest.zip`
pub fn archive_file_name(version: &str) -> String {
    format!("commandlinetools-{}-{}_latest.zip", host_os_tag(), version)
}

/// Directory the archive is bundled in: next to the running executable
fn bundled_archive_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
