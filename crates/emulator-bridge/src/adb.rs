//! ADB (Android Debug Bridge) daemon
//!
//! Teardown only needs to stop a running adb server so the SDK root can be
//! deleted.

use tracing::{debug, info};

use droidenv_core::{CommandOutput, CommandRunner, Invocation, Result};

/// Running adb server processes
pub struct AdbDaemon<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> AdbDaemon<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// OS command that force-kills every adb process
    pub fn kill_command() -> Invocation {
        let command = if cfg!(windows) {
            Invocation::new("taskkill").args(["/F", "/IM", "adb.exe"])
        } else {
            Invocation::new("pkill").args(["-x", "adb"])
        };
        command.capture()
    }

    /// Kill the adb server. A non-zero exit usually means no daemon was
    /// running and is returned as [`droidenv_core::DroidEnvError::CommandFailed`].
    pub async fn terminate(&self) -> Result<CommandOutput> {
        info!("Terminating adb processes...");
        let invocation = Self::kill_command();
        let output = self.runner.run_checked(&invocation).await?;
        debug!("adb terminated: {}", output.stdout.trim());
        Ok(output)
    }
}
