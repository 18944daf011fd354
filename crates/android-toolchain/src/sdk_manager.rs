//! SDK Manager
//!
//! Wraps the Android SDK manager to install packages and accept licenses.

use std::path::PathBuf;
use tracing::{info, error, warn};

use droidenv_core::{CommandRunner, Invocation, Result, SdkLayout, StdinFeed};

/// License file sdkmanager writes once the SDK license is accepted
pub const SDK_LICENSE_FILE: &str = "android-sdk-license";

/// Result of installing one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutcome {
    pub package: String,
    /// Failure message, `None` on success
    pub error: Option<String>,
}

impl PackageOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Android SDK Manager wrapper
pub struct SdkManager<'a> {
    runner: &'a dyn CommandRunner,
    sdkmanager_path: PathBuf,
    sdk_root: PathBuf,
    licenses_dir: PathBuf,
    envs: Vec<(String, String)>,
}

impl<'a> SdkManager<'a> {
    /// Create a new SDK manager for the resolved layout
    pub fn new(runner: &'a dyn CommandRunner, layout: &SdkLayout) -> Self {
        let sdk_root = layout.sdk_root.display().to_string();
        Self {
            runner,
            sdkmanager_path: layout.sdkmanager.clone(),
            sdk_root: layout.sdk_root.clone(),
            licenses_dir: layout.licenses_dir.clone(),
            envs: vec![
                ("ANDROID_HOME".to_string(), sdk_root.clone()),
                ("ANDROID_SDK_ROOT".to_string(), sdk_root),
            ],
        }
    }

    /// Extra environment passed to every sdkmanager call
    pub fn with_env<I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.envs.extend(envs);
        self
    }

    /// Whether the sdkmanager script is present
    pub fn is_available(&self) -> bool {
        self.sdkmanager_path.is_file()
    }

    /// Create the base command with environment variables
    fn command(&self) -> Invocation {
        Invocation::new(&self.sdkmanager_path).envs(self.envs.clone())
    }

    /// `sdkmanager --install "<package>"`
    pub async fn install_package(&self, package: &str) -> Result<()> {
        info!("Installing: {}", package);
        let invocation = self.command().arg("--install").arg(package);
        self.runner.run_checked(&invocation).await?;
        Ok(())
    }

    /// Install each package in order. A failed package is logged and does not
    /// stop the ones after it.
    pub async fn install_all(&self, packages: &[String]) -> Vec<PackageOutcome> {
        let mut outcomes = Vec::with_capacity(packages.len());

        for package in packages {
            let error = match self.install_package(package).await {
                Ok(()) => None,
                Err(e) => {
                    error!("Failed to install {}: {}", package, e);
                    Some(e.to_string())
                }
            };
            outcomes.push(PackageOutcome { package: package.clone(), error });
        }

        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        if failed == 0 {
            info!("SDK packages installed successfully");
        } else {
            warn!("{} of {} SDK packages failed to install", failed, outcomes.len());
        }
        outcomes
    }

    /// Accept all licenses, answering every prompt with `answer` until
    /// sdkmanager stops reading.
    pub async fn accept_licenses(&self, answer: &str) -> Result<()> {
        info!("Accepting Android SDK licenses...");

        let invocation = self
            .command()
            .arg("--licenses")
            .arg(format!("--sdk_root={}", self.sdk_root.display()))
            .stdin(StdinFeed::Repeat(format!("{}\n", answer.trim())));
        self.runner.run_checked(&invocation).await?;

        if self.licenses_accepted() {
            info!("Licenses accepted");
        } else {
            warn!(
                "sdkmanager finished but {:?} is missing; licenses may not be accepted",
                self.licenses_dir.join(SDK_LICENSE_FILE)
            );
        }
        Ok(())
    }

    /// Whether the SDK license file exists
    pub fn licenses_accepted(&self) -> bool {
        self.licenses_dir.join(SDK_LICENSE_FILE).is_file()
    }
}
