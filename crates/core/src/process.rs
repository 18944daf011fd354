//! External command invocation
//!
//! Every external tool (sdkmanager, avdmanager, emulator, kill and
//! environment commands) is reached through [`CommandRunner`], so the
//! pipelines can be driven by a recording fake in tests.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{DroidEnvError, Result};

/// Input piped to a child's stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinFeed {
    /// Keep writing the line until the child stops reading
    Repeat(String),
}

/// One external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub stdin: Option<StdinFeed>,
    /// Capture stdout/stderr instead of forwarding them to the terminal
    pub capture: bool,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs<I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.envs.extend(envs);
        self
    }

    pub fn stdin(mut self, feed: StdinFeed) -> Self {
        self.stdin = Some(feed);
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// File stem of the program, e.g. `sdkmanager` for `.../bin/sdkmanager.bat`
    pub fn program_stem(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Value of an environment override, last write wins
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() || s.contains([' ', ';', '"']) {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

/// Result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful exit with no output
    pub fn ok() -> Self {
        Self { code: Some(0), ..Default::default() }
    }

    /// Successful exit with captured stdout
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    /// Non-zero exit with captured stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`DroidEnvError::CommandFailed`]
    pub fn check(self, invocation: &Invocation) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(DroidEnvError::CommandFailed {
                command: invocation.to_string(),
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

/// Capability to run one external command to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run and require a zero exit
    async fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.run(invocation).await?.check(invocation)
    }
}

/// Runs commands with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!("exec: {}", invocation);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.envs {
            cmd.env(key, value);
        }

        cmd.stdin(if invocation.stdin.is_some() { Stdio::piped() } else { Stdio::inherit() });
        if invocation.capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = cmd.spawn().map_err(|source| DroidEnvError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })?;

        let stdin = child.stdin.take();
        let feed = invocation.stdin.clone();
        let writer = async move {
            let (Some(mut stdin), Some(feed)) = (stdin, feed) else {
                return;
            };
            let StdinFeed::Repeat(line) = feed;
            let mut written: u64 = 0;
            while stdin.write_all(line.as_bytes()).await.is_ok() {
                written += 1;
            }
            debug!("stdin closed by child after {} answers", written);
        };

        let (_, output) = tokio::join!(writer, child.wait_with_output());
        let output = output?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Recording fake for tests
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    type Handler = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

    /// Records every invocation; answers through an optional handler,
    /// otherwise with a successful empty output.
    #[derive(Default)]
    pub struct RecordingRunner {
        calls: Mutex<Vec<Invocation>>,
        handler: Option<Handler>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_handler<F>(handler: F) -> Self
        where
            F: Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
        {
            Self {
                calls: Mutex::new(Vec::new()),
                handler: Some(Box::new(handler)),
            }
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        /// Invocations whose program stem is `stem`
        pub fn calls_to(&self, stem: &str) -> Vec<Invocation> {
            self.calls()
                .into_iter()
                .filter(|c| c.program_stem() == stem)
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(match &self.handler {
                Some(handler) => handler(invocation),
                None => CommandOutput::ok(),
            })
        }
    }
}
