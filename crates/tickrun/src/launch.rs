//! # Script Lifecycle
//!
//! Starts script processes and stops them with a bounded grace period.
//! Launching is behind a trait so tests (and embedders that connect
//! scripts by other means) can skip process management entirely.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::process::Command;

use crate::config::ENV_PORT;
use crate::config::ENV_SCRIPT;
use crate::config::ENV_TOKEN;
use crate::error::RunError;
use crate::error::RunResult;

pub struct LaunchSpec {
    pub script: PathBuf,
    pub port: u16,
    pub token: String,
}

#[async_trait]
pub trait ScriptLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> RunResult<ScriptHandle>;
}

/// A launched script. Dropping the handle kills the process.
pub struct ScriptHandle {
    script: PathBuf,
    child: Option<Child>,
}

impl ScriptHandle {
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Wait up to `grace` for the process to exit on its own, then kill it.
    /// The protocol-level shutdown message should already have been sent.
    pub async fn stop(mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(script = %self.script.display(), %status, "script exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(script = %self.script.display(), error = %e, "wait failed");
            }
            Err(_) => {
                tracing::warn!(script = %self.script.display(), "script ignored shutdown, killing");
                let _ = child.kill().await;
            }
        }
    }
}

/// Runs each script under an external runtime executable, passing the
/// connection details through the environment.
pub struct ProcessLauncher {
    runtime: String,
}

impl ProcessLauncher {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }
}

#[async_trait]
impl ScriptLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> RunResult<ScriptHandle> {
        let child = Command::new(&self.runtime)
            .arg(&spec.script)
            .env(ENV_PORT, spec.port.to_string())
            .env(ENV_TOKEN, &spec.token)
            .env(ENV_SCRIPT, &spec.script)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunError::Launch(format!("{}: {}", self.runtime, e)))?;
        tracing::info!(script = %spec.script.display(), "launched script");
        Ok(ScriptHandle {
            script: spec.script.clone(),
            child: Some(child),
        })
    }
}

/// Launcher that starts nothing. The peer is expected to connect on its
/// own, as the in-process clients in the tests do.
pub struct NullLauncher;

#[async_trait]
impl ScriptLauncher for NullLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> RunResult<ScriptHandle> {
        Ok(ScriptHandle {
            script: spec.script.clone(),
            child: None,
        })
    }
}

/// Scripts in `dir` with the given extension, sorted by name. Files whose
/// name starts with an underscore are helpers, not entry points.
pub fn discover_scripts(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('_') {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}
