//! Emulator Launcher
//!
//! Starts the Android emulator for an AVD in the foreground.

use std::path::PathBuf;
use tracing::{info, debug};

use droidenv_core::{CommandOutput, CommandRunner, DroidEnvError, Invocation, Result, SdkLayout};

/// Emulator launcher
pub struct EmulatorLauncher<'a> {
    runner: &'a dyn CommandRunner,
    emulator: PathBuf,
    envs: Vec<(String, String)>,
}

impl<'a> EmulatorLauncher<'a> {
    /// Create a new emulator launcher
    pub fn new(runner: &'a dyn CommandRunner, layout: &SdkLayout) -> Self {
        Self {
            runner,
            emulator: layout.emulator.clone(),
            envs: Vec::new(),
        }
    }

    /// Extra environment passed to the emulator
    pub fn with_env<I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.envs.extend(envs);
        self
    }

    /// Check if emulator is available
    pub fn is_available(&self) -> bool {
        self.emulator.is_file()
    }

    /// `emulator -avd <name>`; returns once the emulator exits
    pub async fn launch(&self, avd_name: &str) -> Result<CommandOutput> {
        if !self.is_available() {
            return Err(DroidEnvError::NotFound(format!(
                "emulator binary at {}",
                self.emulator.display()
            )));
        }

        info!("Launching emulator for AVD '{}'...", avd_name);
        let invocation = Invocation::new(&self.emulator)
            .args(["-avd", avd_name])
            .envs(self.envs.clone());

        let output = self.runner.run_checked(&invocation).await?;
        debug!("Emulator for '{}' exited", avd_name);
        Ok(output)
    }
}
