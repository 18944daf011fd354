//! Provision, teardown, reinstall and status pipelines
//!
//! Each pipeline runs its steps strictly in order and records every step in
//! a [`RunReport`]. Most failures are logged and the run continues; the
//! exceptions (archive, extraction, layout, a missing sdkmanager, session
//! environment, filesystem removal and AVD creation) end the run with a
//! [`PipelineFailure`] that still carries the report.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use droidenv_android_toolchain::env::SDK_VARS;
use droidenv_android_toolchain::{
    extract_zip, normalize_cmdline_tools_layout, prepare_archive, AndroidEnv, EnvStore, SdkManager,
};
use droidenv_core::fs::{create_if_missing, remove_if_exists};
use droidenv_core::{CommandRunner, DroidEnvError, ProvisionConfig, Result, SdkLayout};
use droidenv_emulator_bridge::{AdbDaemon, AvdManager, AvdSpec, EmulatorLauncher};

use crate::report::{RunReport, Step};

/// A run that stopped early, with every step recorded up to the failure
#[derive(Debug, Error)]
#[error("{} failed", .report.pipeline)]
pub struct PipelineFailure {
    pub report: RunReport,
    #[source]
    pub error: DroidEnvError,
}

pub type PipelineResult = std::result::Result<RunReport, PipelineFailure>;

fn finish(report: RunReport, result: Result<()>) -> PipelineResult {
    match result {
        Ok(()) => Ok(report),
        Err(error) => Err(PipelineFailure { report, error }),
    }
}

/// Pipelines over one resolved configuration
pub struct Pipeline<'a> {
    config: &'a ProvisionConfig,
    layout: &'a SdkLayout,
    runner: &'a dyn CommandRunner,
    session: &'a dyn EnvStore,
    persisted: &'a dyn EnvStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a ProvisionConfig,
        layout: &'a SdkLayout,
        runner: &'a dyn CommandRunner,
        session: &'a dyn EnvStore,
        persisted: &'a dyn EnvStore,
    ) -> Self {
        Self {
            config,
            layout,
            runner,
            session,
            persisted,
        }
    }

    /// Extract the tools, install packages, create the AVD, persist the
    /// environment and launch the emulator.
    ///
    /// Fails with [`DroidEnvError::AvdCreation`] when the AVD cannot be
    /// created; the emulator is not launched in that case.
    pub async fn provision(&self) -> PipelineResult {
        let mut report = RunReport::new("provision");
        let result = self.run_provision(&mut report).await;
        finish(report, result)
    }

    /// Stop adb, delete the SDK root and AVD files, clear the persisted
    /// variables and take the added entries back out of the persisted PATH.
    pub async fn teardown(&self) -> PipelineResult {
        let mut report = RunReport::new("teardown");

        self.terminate_daemon(&mut report).await;
        if let Err(error) = self.remove_installation(&mut report).await {
            return Err(PipelineFailure { report, error });
        }
        self.clear_persisted_vars(&mut report).await;
        self.revert_persisted_path(&mut report).await;

        info!("Cleanup complete.");
        Ok(report)
    }

    /// Teardown without the PATH revert, followed by a full provision
    pub async fn reinstall(&self) -> PipelineResult {
        let mut report = RunReport::new("reinstall");

        self.terminate_daemon(&mut report).await;
        if let Err(error) = self.remove_installation(&mut report).await {
            return Err(PipelineFailure { report, error });
        }
        self.clear_persisted_vars(&mut report).await;
        let result = self.run_provision(&mut report).await;

        finish(report, result)
    }

    /// Report what is installed without changing anything
    pub async fn status(&self) -> PipelineResult {
        let mut report = RunReport::new("status");
        let layout = self.layout;

        let paths: [(&str, &Path); 7] = [
            ("SDK root", &layout.sdk_root),
            ("command-line tools", &layout.tools_latest),
            ("sdkmanager", &layout.sdkmanager),
            ("avdmanager", &layout.avdmanager),
            ("emulator", &layout.emulator),
            ("adb", &layout.adb),
            ("AVD folder", &layout.avd_dir),
        ];
        for (label, path) in paths {
            if path.exists() {
                report.ok(Step::Inspect, format!("{}: {}", label, path.display()));
            } else {
                report.skipped(Step::Inspect, format!("{}: not found at {}", label, path.display()));
            }
        }

        if SdkManager::new(self.runner, layout).licenses_accepted() {
            report.ok(Step::Inspect, "licenses: accepted");
        } else {
            report.skipped(Step::Inspect, "licenses: not accepted");
        }

        let avd = AvdManager::new(self.runner, layout);
        if avd.exists(&self.config.avd_name) {
            match avd.read_info(&self.config.avd_name).await {
                Ok(info) => report.ok(
                    Step::Inspect,
                    format!(
                        "AVD '{}': image {}, abi {}, device {}",
                        info.name,
                        info.target,
                        info.abi,
                        info.device_name.as_deref().unwrap_or("unknown")
                    ),
                ),
                Err(e) => report.warned(Step::Inspect, format!("AVD '{}': {}", self.config.avd_name, e)),
            }
        }

        for key in SDK_VARS {
            match self.persisted.get(key).await {
                Ok(Some(value)) if !value.is_empty() => {
                    report.ok(Step::Inspect, format!("{}={} ({})", key, value, self.persisted.describe()))
                }
                Ok(_) => report.skipped(Step::Inspect, format!("{} not set in {}", key, self.persisted.describe())),
                Err(e) => report.warned(Step::Inspect, format!("{}: {}", key, e)),
            }
        }

        Ok(report)
    }

    async fn run_provision(&self, report: &mut RunReport) -> Result<()> {
        let config = self.config;
        let layout = self.layout;

        let created = create_if_missing(&layout.sdk_root)
            .await
            .map_err(|e| report.fail(Step::EnsureSdkRoot, e))?;
        if created {
            info!("Created SDK directory: {}", layout.sdk_root.display());
            report.ok(Step::EnsureSdkRoot, format!("created {}", layout.sdk_root.display()));
        } else {
            report.ok(Step::EnsureSdkRoot, format!("{} already present", layout.sdk_root.display()));
        }

        let archive = prepare_archive(config, layout).await.map_err(|e| {
            error!("Cannot use the command-line tools archive: {}", e);
            report.fail(Step::PrepareArchive, e)
        })?;
        report.ok(Step::PrepareArchive, archive.display().to_string());

        info!("Extracting {} to {}...", archive.display(), layout.sdk_root.display());
        let extracted = extract_zip(&archive, &layout.sdk_root).await.map_err(|e| {
            error!("Extraction failed: {}", e);
            report.fail(Step::ExtractArchive, e)
        })?;
        report.ok(Step::ExtractArchive, format!("{} entries", extracted));

        let fix = normalize_cmdline_tools_layout(&layout.cmdline_tools_root)
            .await
            .map_err(|e| report.fail(Step::NormalizeLayout, e))?;
        if fix.is_noop() {
            report.skipped(Step::NormalizeLayout, "layout already canonical");
        } else {
            report.ok(Step::NormalizeLayout, format!("{} entries moved", fix.moved.len()));
        }

        let sdk = SdkManager::new(self.runner, layout);
        if !sdk.is_available() {
            error!(
                "sdkmanager not found at {}. The archive does not contain the command-line tools.",
                layout.sdkmanager.display()
            );
            let e = DroidEnvError::NotFound(format!("sdkmanager at {}", layout.sdkmanager.display()));
            return Err(report.fail(Step::LocateTools, e));
        }
        report.ok(Step::LocateTools, layout.sdkmanager.display().to_string());

        let env = AndroidEnv::from_layout(layout);
        if let Some((key, e)) = env.apply(self.session).await.into_iter().next() {
            error!("Failed to set {} in {}: {}", key, self.session.describe(), e);
            return Err(report.fail(Step::SessionEnv, DroidEnvError::Env(format!("{}: {}", key, e))));
        }
        report.ok(Step::SessionEnv, self.session.describe());
        let command_env = env
            .command_env(self.session)
            .await
            .map_err(|e| report.fail(Step::SessionEnv, e))?;

        let sdk = sdk.with_env(command_env.clone());
        for outcome in sdk.install_all(&config.packages).await {
            match outcome.error {
                None => report.ok(Step::InstallPackage, outcome.package),
                Some(e) => report.warned(Step::InstallPackage, format!("{}: {}", outcome.package, e)),
            }
        }

        match sdk.accept_licenses(&config.license_answer).await {
            Ok(()) if sdk.licenses_accepted() => report.ok(Step::AcceptLicenses, "license file present"),
            Ok(()) => report.warned(Step::AcceptLicenses, "sdkmanager finished without writing a license file"),
            Err(e) => {
                error!("Failed to accept licenses: {}", e);
                report.warned(Step::AcceptLicenses, e.user_message());
            }
        }

        let avd = AvdManager::new(self.runner, layout).with_env(command_env.clone());
        if avd.exists(&config.avd_name) {
            let removal = avd
                .remove_avd_files(&config.avd_name)
                .await
                .map_err(|e| report.fail(Step::ResetAvd, e))?;
            info!("Removed stale AVD folder: {}", avd.avd_dir(&config.avd_name).display());
            debug!("{:?}", removal);
            report.ok(Step::ResetAvd, format!("removed stale {}", avd.avd_dir(&config.avd_name).display()));
        }

        if let Err(e) = avd.create_avd(&AvdSpec::from_config(config)).await {
            error!("{}", e);
            return Err(report.fail(Step::CreateAvd, e));
        }
        report.ok(Step::CreateAvd, format!("AVD '{}' created", config.avd_name));

        if config.persist_environment {
            info!("Setting environment variables in {}...", self.persisted.describe());
            let failures = env.apply(self.persisted).await;
            if failures.is_empty() {
                report.ok(Step::PersistEnv, self.persisted.describe());
            } else {
                for (key, e) in &failures {
                    error!("Failed to set environment variable {}: {}", key, e);
                }
                let keys: Vec<&str> = failures.iter().map(|(k, _)| k.as_str()).collect();
                report.warned(Step::PersistEnv, format!("failed for {}", keys.join(", ")));
            }
        } else {
            report.skipped(Step::PersistEnv, "disabled in configuration");
        }

        if !config.launch_emulator {
            report.skipped(Step::LaunchEmulator, "disabled in configuration");
            return Ok(());
        }

        let launcher = EmulatorLauncher::new(self.runner, layout).with_env(command_env);
        match launcher.launch(&config.avd_name).await {
            Ok(_) => report.ok(Step::LaunchEmulator, format!("emulator for '{}' exited", config.avd_name)),
            Err(DroidEnvError::NotFound(what)) => {
                error!("Emulator not found. Make sure the 'emulator' package is installed.");
                report.warned(Step::LaunchEmulator, format!("not found: {}", what));
            }
            Err(e) => {
                error!("Failed to launch emulator: {}", e);
                report.warned(Step::LaunchEmulator, e.user_message());
            }
        }

        Ok(())
    }

    async fn terminate_daemon(&self, report: &mut RunReport) {
        match AdbDaemon::new(self.runner).terminate().await {
            Ok(_) => report.ok(Step::TerminateDaemon, "adb processes terminated"),
            Err(e) => {
                warn!("adb process not found or already stopped.");
                debug!("{}", e);
                report.warned(Step::TerminateDaemon, "adb process not found or already stopped");
            }
        }
    }

    async fn remove_installation(&self, report: &mut RunReport) -> Result<()> {
        let layout = self.layout;
        let name = &self.config.avd_name;

        let removed = remove_if_exists(&layout.sdk_root, true)
            .await
            .map_err(|e| report.fail(Step::RemoveSdkRoot, e))?;
        if removed {
            info!("Removed SDK directory: {}", layout.sdk_root.display());
            report.ok(Step::RemoveSdkRoot, layout.sdk_root.display().to_string());
        } else {
            info!("No SDK directory found at {}", layout.sdk_root.display());
            report.skipped(Step::RemoveSdkRoot, format!("not found: {}", layout.sdk_root.display()));
        }

        let avd = AvdManager::new(self.runner, layout);
        let removal = avd
            .remove_avd_files(name)
            .await
            .map_err(|e| report.fail(Step::RemoveAvdFolder, e))?;
        let targets = [
            (Step::RemoveAvdFolder, "AVD folder", avd.avd_dir(name), removal.folder),
            (Step::RemoveQuickbootFile, "quickbootChoice.ini", avd.quickboot_file(name), removal.quickboot_file),
            (Step::RemoveAvdIni, "AVD registration", avd.avd_ini(name), removal.ini),
        ];
        for (step, label, path, removed) in targets {
            if removed {
                info!("Removed {}: {}", label, path.display());
                report.ok(step, path.display().to_string());
            } else {
                info!("No {} found at {}", label, path.display());
                report.skipped(step, format!("not found: {}", path.display()));
            }
        }
        Ok(())
    }

    async fn clear_persisted_vars(&self, report: &mut RunReport) {
        info!("Removing environment variables...");
        let failures = AndroidEnv::from_layout(self.layout).clear_vars(self.persisted).await;

        if failures.is_empty() {
            info!("Environment variables removed.");
            report.ok(
                Step::ClearPersistedEnv,
                format!("{} cleared in {}", SDK_VARS.join(", "), self.persisted.describe()),
            );
        } else {
            for (key, e) in &failures {
                warn!("Failed to clear environment variable {}: {}", key, e);
            }
            let keys: Vec<&str> = failures.iter().map(|(k, _)| k.as_str()).collect();
            report.warned(Step::ClearPersistedEnv, format!("failed for {}", keys.join(", ")));
        }
    }

    async fn revert_persisted_path(&self, report: &mut RunReport) {
        let env = AndroidEnv::from_layout(self.layout);
        match env.revert_path(self.persisted).await {
            Ok(()) => {
                info!("Successfully reverted PATH modification.");
                report.ok(Step::RevertPath, format!("{} entries removed", env.path_additions.len()));
            }
            Err(e) => {
                error!("Failed to revert PATH: {}", e);
                report.warned(Step::RevertPath, e.to_string());
            }
        }
    }
}
