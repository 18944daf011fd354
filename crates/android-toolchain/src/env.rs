//! Environment Manager
//!
//! Two tiers of environment state receive the same Android variables:
//! the session (this process and its children) and the persisted user
//! environment seen by future sessions. Both sit behind [`EnvStore`] so the
//! pipelines can be run against in-memory fakes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use droidenv_core::{CommandRunner, DroidEnvError, Invocation, Result, SdkLayout};

/// Variables pointing at the SDK root
pub const SDK_VARS: [&str; 2] = ["ANDROID_HOME", "ANDROID_SDK_ROOT"];

const PATH_KEY: &str = "PATH";

/// Which tier a store writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvScope {
    /// Current process, visible to every command this run spawns
    Session,
    /// User-level environment for future sessions
    Persisted,
}

/// A key/value environment with PATH list operations
#[async_trait]
pub trait EnvStore: Send + Sync {
    fn scope(&self) -> EnvScope;

    /// Short description for logs
    fn describe(&self) -> String;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn clear(&self, key: &str) -> Result<()>;

    /// Add entries to PATH, skipping ones already present
    async fn add_path(&self, entries: &[PathBuf]) -> Result<()>;

    /// Remove entries from PATH
    async fn remove_path(&self, entries: &[PathBuf]) -> Result<()>;
}

/// PATH list separator for this host
pub fn path_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

fn same_entry(a: &str, b: &str) -> bool {
    let a = a.trim_end_matches(['/', '\\']);
    let b = b.trim_end_matches(['/', '\\']);
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn split_path(value: &str) -> Vec<String> {
    value
        .split(path_separator())
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect()
}

/// Add `entries` to the PATH list `existing`, front or back. An entry already
/// present is moved rather than duplicated.
pub fn merge_path(existing: &str, entries: &[PathBuf], prepend: bool) -> String {
    let additions: Vec<String> = entries.iter().map(|p| p.display().to_string()).collect();
    let rest: Vec<String> = split_path(existing)
        .into_iter()
        .filter(|e| !additions.iter().any(|a| same_entry(a, e)))
        .collect();

    let merged = if prepend {
        additions.into_iter().chain(rest).collect::<Vec<_>>()
    } else {
        rest.into_iter().chain(additions).collect::<Vec<_>>()
    };
    merged.join(&path_separator().to_string())
}

/// Remove `entries` from the PATH list `existing`
pub fn strip_path(existing: &str, entries: &[PathBuf]) -> String {
    let removals: Vec<String> = entries.iter().map(|p| p.display().to_string()).collect();
    split_path(existing)
        .into_iter()
        .filter(|e| !removals.iter().any(|r| same_entry(r, e)))
        .collect::<Vec<_>>()
        .join(&path_separator().to_string())
}

/// The current process environment
///
/// Writes go through `std::env::set_var`, which is only sound while no other
/// thread reads the environment. Use it from a current-thread runtime, and
/// only from async code (the blocking pool never touches the environment).
#[derive(Debug, Default)]
pub struct ProcessEnv;

#[async_trait]
impl EnvStore for ProcessEnv {
    fn scope(&self) -> EnvScope {
        EnvScope::Session
    }

    fn describe(&self) -> String {
        "process environment".to_string()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(std::env::var(key).ok())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        std::env::set_var(key, value);
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        std::env::remove_var(key);
        Ok(())
    }

    async fn add_path(&self, entries: &[PathBuf]) -> Result<()> {
        let current = std::env::var(PATH_KEY).unwrap_or_default();
        std::env::set_var(PATH_KEY, merge_path(&current, entries, true));
        Ok(())
    }

    async fn remove_path(&self, entries: &[PathBuf]) -> Result<()> {
        let current = std::env::var(PATH_KEY).unwrap_or_default();
        std::env::set_var(PATH_KEY, strip_path(&current, entries));
        Ok(())
    }
}

/// In-memory store. Session scope prepends PATH entries, persisted scope
/// appends them, like the real stores do.
#[derive(Debug)]
pub struct MemoryEnv {
    scope: EnvScope,
    vars: Mutex<BTreeMap<String, String>>,
}

impl MemoryEnv {
    pub fn new(scope: EnvScope) -> Self {
        Self { scope, vars: Mutex::new(BTreeMap::new()) }
    }

    pub fn with_var(self, key: &str, value: &str) -> Self {
        self.lock().insert(key.to_string(), value.to_string());
        self
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still a valid map.
        self.vars.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EnvStore for MemoryEnv {
    fn scope(&self) -> EnvScope {
        self.scope
    }

    fn describe(&self) -> String {
        format!("in-memory {:?} environment", self.scope)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn add_path(&self, entries: &[PathBuf]) -> Result<()> {
        let mut vars = self.lock();
        let current = vars.get(PATH_KEY).cloned().unwrap_or_default();
        let merged = merge_path(&current, entries, self.scope == EnvScope::Session);
        vars.insert(PATH_KEY.to_string(), merged);
        Ok(())
    }

    async fn remove_path(&self, entries: &[PathBuf]) -> Result<()> {
        let mut vars = self.lock();
        if let Some(current) = vars.get(PATH_KEY).cloned() {
            vars.insert(PATH_KEY.to_string(), strip_path(&current, entries));
        }
        Ok(())
    }
}

/// Windows user environment (`HKCU\Environment`), written with `setx`
pub struct SetxEnv<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> SetxEnv<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    async fn setx(&self, key: &str, value: &str) -> Result<()> {
        let invocation = Invocation::new("setx").arg(key).arg(value).capture();
        self.runner.run_checked(&invocation).await?;
        Ok(())
    }
}

/// Value of `key` in `reg query HKCU\Environment /v <key>` output
pub fn parse_reg_query(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace)?;
        if !name.eq_ignore_ascii_case(key) {
            return None;
        }
        let rest = rest.trim_start();
        if !rest.starts_with("REG_") {
            return None;
        }
        Some(
            rest.split_once(char::is_whitespace)
                .map(|(_, value)| value.trim().to_string())
                .unwrap_or_default(),
        )
    })
}

#[async_trait]
impl<'a> EnvStore for SetxEnv<'a> {
    fn scope(&self) -> EnvScope {
        EnvScope::Persisted
    }

    fn describe(&self) -> String {
        "user environment (setx)".to_string()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let invocation = Invocation::new("reg")
            .args(["query", "HKCU\\Environment", "/v", key])
            .capture();
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            // reg exits non-zero when the value does not exist
            return Ok(None);
        }
        Ok(parse_reg_query(&output.stdout, key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.setx(key, value).await
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.setx(key, "").await
    }

    async fn add_path(&self, entries: &[PathBuf]) -> Result<()> {
        let current = self.get(PATH_KEY).await?.unwrap_or_default();
        let merged = merge_path(&current, entries, false);
        if merged == current {
            debug!("User PATH already contains {:?}", entries);
            return Ok(());
        }
        self.setx(PATH_KEY, &merged).await
    }

    async fn remove_path(&self, entries: &[PathBuf]) -> Result<()> {
        let Some(current) = self.get(PATH_KEY).await? else {
            return Ok(());
        };
        let stripped = strip_path(&current, entries);
        if stripped == current {
            debug!("User PATH does not contain {:?}", entries);
            return Ok(());
        }
        self.setx(PATH_KEY, &stripped).await
    }
}

/// A managed shell profile of `export` lines for non-Windows hosts.
/// PATH is stored as the added entries and rendered as `"<entries>:$PATH"`.
/// The file is removed once it holds no variables.
#[derive(Debug)]
pub struct ProfileEnv {
    path: PathBuf,
}

const PROFILE_HEADER: &str = "# Managed by droidenv. Source this file from your shell profile.";

impl ProfileEnv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<(String, String)>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_profile(&contents))
    }

    async fn store(&self, vars: &[(String, String)]) -> Result<()> {
        if vars.is_empty() {
            droidenv_core::fs::remove_if_exists(&self.path, false).await?;
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, render_profile(vars)).await?;
        debug!("Wrote {:?}", self.path);
        Ok(())
    }

    async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<(String, String)>) + Send,
    {
        let mut vars = self.load().await?;
        f(&mut vars);
        vars.retain(|(k, v)| !(k == PATH_KEY && v.is_empty()));
        self.store(&vars).await
    }
}

fn upsert(vars: &mut Vec<(String, String)>, key: &str, value: String) {
    match vars.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value,
        None => vars.push((key.to_string(), value)),
    }
}

fn escape_shell(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape_shell(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn render_profile(vars: &[(String, String)]) -> String {
    let mut content = format!("{}\n", PROFILE_HEADER);
    for (key, value) in vars {
        if key == PATH_KEY {
            content.push_str(&format!("export PATH=\"{}:$PATH\"\n", escape_shell(value)));
        } else {
            content.push_str(&format!("export {}=\"{}\"\n", key, escape_shell(value)));
        }
    }
    content
}

fn parse_profile(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, raw) = line.trim().strip_prefix("export ")?.split_once('=')?;
            let raw = raw.trim();
            let raw = raw
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .unwrap_or(raw);
            let raw = if key == PATH_KEY {
                raw.strip_suffix(":$PATH").unwrap_or(raw)
            } else {
                raw
            };
            Some((key.trim().to_string(), unescape_shell(raw)))
        })
        .collect()
}

#[async_trait]
impl EnvStore for ProfileEnv {
    fn scope(&self) -> EnvScope {
        EnvScope::Persisted
    }

    fn describe(&self) -> String {
        format!("profile script {}", self.path.display())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load().await?.into_iter().find(|(k, _)| k == key).map(|(_, v)| v))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key == PATH_KEY {
            return Err(DroidEnvError::Env("use add_path to persist PATH entries".into()));
        }
        let value = value.to_string();
        self.update(move |vars| upsert(vars, key, value)).await
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.update(|vars| vars.retain(|(k, _)| k != key)).await
    }

    async fn add_path(&self, entries: &[PathBuf]) -> Result<()> {
        self.update(|vars| {
            let current = vars
                .iter()
                .find(|(k, _)| k == PATH_KEY)
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            upsert(vars, PATH_KEY, merge_path(&current, entries, false));
        })
        .await
    }

    async fn remove_path(&self, entries: &[PathBuf]) -> Result<()> {
        self.update(|vars| {
            if let Some(slot) = vars.iter_mut().find(|(k, _)| k == PATH_KEY) {
                slot.1 = strip_path(&slot.1, entries);
            }
        })
        .await
    }
}

/// The persisted store for this host: `setx` on Windows, a profile script
/// elsewhere.
pub fn persistent_store<'a>(runner: &'a dyn CommandRunner, layout: &SdkLayout) -> Box<dyn EnvStore + 'a> {
    if cfg!(windows) {
        Box::new(SetxEnv::new(runner))
    } else {
        Box::new(ProfileEnv::new(layout.env_profile.clone()))
    }
}

/// The Android variables provisioning writes and teardown clears
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidEnv {
    pub sdk_root: PathBuf,
    pub path_additions: Vec<PathBuf>,
}

impl AndroidEnv {
    pub fn from_layout(layout: &SdkLayout) -> Self {
        Self {
            sdk_root: layout.sdk_root.clone(),
            path_additions: layout.path_additions(),
        }
    }

    /// `ANDROID_HOME` and `ANDROID_SDK_ROOT`, both set to the SDK root
    pub fn vars(&self) -> Vec<(String, String)> {
        let sdk_root = self.sdk_root.display().to_string();
        SDK_VARS
            .iter()
            .map(|key| (key.to_string(), sdk_root.clone()))
            .collect()
    }

    /// Set the SDK variables and add the PATH entries. Every key is
    /// attempted; failures are returned by key.
    pub async fn apply(&self, store: &dyn EnvStore) -> Vec<(String, DroidEnvError)> {
        let mut failures = Vec::new();

        for (key, value) in self.vars() {
            if let Err(e) = store.set(&key, &value).await {
                failures.push((key, e));
            }
        }
        if let Err(e) = store.add_path(&self.path_additions).await {
            failures.push((PATH_KEY.to_string(), e));
        }

        if failures.is_empty() {
            info!("Applied Android environment to {}", store.describe());
        }
        failures
    }

    /// Clear only the SDK variables, leaving PATH alone
    pub async fn clear_vars(&self, store: &dyn EnvStore) -> Vec<(String, DroidEnvError)> {
        let mut failures = Vec::new();
        for key in SDK_VARS {
            if let Err(e) = store.clear(key).await {
                failures.push((key.to_string(), e));
            }
        }
        failures
    }

    /// Remove the PATH entries this environment adds
    pub async fn revert_path(&self, store: &dyn EnvStore) -> Result<()> {
        store.remove_path(&self.path_additions).await
    }

    /// Child-process overrides for commands run in this session
    pub async fn command_env(&self, session: &dyn EnvStore) -> Result<Vec<(String, String)>> {
        let mut env = self.vars();
        if let Some(path) = session.get(PATH_KEY).await? {
            env.push((PATH_KEY.to_string(), path));
        }
        Ok(env)
    }
}
