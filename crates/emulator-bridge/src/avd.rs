//! AVD (Android Virtual Device) Manager
//!
//! Creates virtual devices with avdmanager and resets their on-disk state.

use std::path::PathBuf;
use tracing::{info, debug};
use configparser::ini::Ini;

use droidenv_core::fs::remove_if_exists;
use droidenv_core::paths::QUICKBOOT_CHOICE_FILE;
use droidenv_core::{CommandRunner, DroidEnvError, Invocation, ProvisionConfig, Result, SdkLayout};

/// AVD information read from `config.ini`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvdInfo {
    pub name: String,
    pub path: PathBuf,
    pub target: String,
    pub abi: String,
    pub device_name: Option<String>,
}

/// AVD configuration for creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvdSpec {
    pub name: String,
    pub package: String, // system image package
    pub device: String,  // device profile
}

impl AvdSpec {
    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self {
            name: config.avd_name.clone(),
            package: config.system_image.clone(),
            device: config.device_profile.clone(),
        }
    }
}

/// What [`AvdManager::remove_avd_files`] found and removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvdRemoval {
    pub folder: bool,
    pub quickboot_file: bool,
    pub ini: bool,
}

/// AVD Manager
pub struct AvdManager<'a> {
    runner: &'a dyn CommandRunner,
    avdmanager: PathBuf,
    sdk_root: PathBuf,
    avd_home: PathBuf,
    envs: Vec<(String, String)>,
}

impl<'a> AvdManager<'a> {
    /// Create a new AVD manager
    pub fn new(runner: &'a dyn CommandRunner, layout: &SdkLayout) -> Self {
        Self {
            runner,
            avdmanager: layout.avdmanager.clone(),
            sdk_root: layout.sdk_root.clone(),
            avd_home: layout.avd_home.clone(),
            envs: Vec::new(),
        }
    }

    /// Extra environment passed to avdmanager
    pub fn with_env<I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.envs.extend(envs);
        self
    }

    /// `<avd home>/<name>.avd`
    pub fn avd_dir(&self, name: &str) -> PathBuf {
        self.avd_home.join(format!("{}.avd", name))
    }

    /// `<avd home>/<name>.ini`
    pub fn avd_ini(&self, name: &str) -> PathBuf {
        self.avd_home.join(format!("{}.ini", name))
    }

    pub fn quickboot_file(&self, name: &str) -> PathBuf {
        self.avd_dir(name).join(QUICKBOOT_CHOICE_FILE)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.avd_dir(name).is_dir()
    }

    /// Create (or, with `--force`, recreate) the AVD
    pub async fn create_avd(&self, spec: &AvdSpec) -> Result<()> {
        if self.exists(&spec.name) {
            info!("AVD '{}' already exists. Recreating with --force...", spec.name);
        } else {
            info!("AVD '{}' not found. Creating...", spec.name);
        }

        let invocation = Invocation::new(&self.avdmanager)
            .args(["create", "avd", "-n", spec.name.as_str()])
            .args(["--device", spec.device.as_str()])
            .args(["-k", spec.package.as_str()])
            .arg("--force")
            .envs(self.envs.clone())
            .env("ANDROID_SDK_ROOT", self.sdk_root.display().to_string());

        let output = self.runner.run(&invocation).await.map_err(|e| DroidEnvError::AvdCreation {
            name: spec.name.clone(),
            reason: e.to_string(),
        })?;

        if !output.success() {
            let reason = match output.stderr.trim() {
                "" => format!("avdmanager exited with {:?}", output.code),
                stderr => stderr.to_string(),
            };
            return Err(DroidEnvError::AvdCreation { name: spec.name.clone(), reason });
        }

        info!("AVD '{}' created successfully.", spec.name);
        Ok(())
    }

    /// Parse `config.ini` of an existing AVD
    pub async fn read_info(&self, name: &str) -> Result<AvdInfo> {
        let avd_dir = self.avd_dir(name);
        let config_path = avd_dir.join("config.ini");
        if !config_path.is_file() {
            return Err(DroidEnvError::NotFound(format!("{}", config_path.display())));
        }

        let content = tokio::fs::read_to_string(&config_path).await?;
        let mut config = Ini::new();
        config
            .read(content)
            .map_err(|e| DroidEnvError::Config(format!("{}: {}", config_path.display(), e)))?;

        Ok(AvdInfo {
            name: name.to_string(),
            path: avd_dir,
            target: config.get("default", "image.sysdir.1").unwrap_or_default(),
            abi: config.get("default", "abi.type").unwrap_or_default(),
            device_name: config.get("default", "hw.device.name"),
        })
    }

    /// Remove the AVD folder, then its quick-boot choice file, then its
    /// `.ini` registration. Missing pieces are skipped.
    pub async fn remove_avd_files(&self, name: &str) -> Result<AvdRemoval> {
        let folder_removed = remove_if_exists(&self.avd_dir(name), true).await?;
        // Normally already gone with the folder.
        let quickboot_file = remove_if_exists(&self.quickboot_file(name), false).await?;
        let ini = remove_if_exists(&self.avd_ini(name), false).await?;

        debug!("Removed AVD files for '{}': folder={} quickboot={} ini={}", name, folder_removed, quickboot_file, ini);
        Ok(AvdRemoval { folder: folder_removed, quickboot_file, ini })
    }
}
