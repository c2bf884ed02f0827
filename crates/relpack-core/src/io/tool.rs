//! External tool invocation.
//!
//! Stages describe a subprocess as a [`ToolInvocation`] and hand it to a
//! [`ToolRunner`]. Production code uses [`SystemToolRunner`]; tests swap in
//! a recording fake.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// A fully described subprocess call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Program name, resolved through `PATH`.
    pub program: String,
    /// Arguments in order.
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub dir: PathBuf,
}

impl ToolInvocation {
    /// Start describing a call to `program` running in `dir`.
    pub fn new(program: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            dir: dir.into(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add one environment override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value of an environment override, if set.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// What a finished subprocess produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ToolOutput {
    /// Returns `true` when the process exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external tools.
#[async_trait]
pub trait ToolRunner: Send + Sync + std::fmt::Debug {
    /// Run `invocation` to completion.
    ///
    /// Returns an I/O error only when the process could not be started.
    /// Dropping the returned future must stop the process.
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput>;
}

/// Run `invocation` and turn spawn failures and non-zero exits into
/// [`PipelineError::ExternalTool`].
pub async fn run_checked(runner: &dyn ToolRunner, invocation: &ToolInvocation) -> Result<ToolOutput> {
    debug!(tool = %invocation.program, args = ?invocation.args, dir = %invocation.dir.display(), "running");

    let output = runner
        .run(invocation)
        .await
        .map_err(|e| PipelineError::ExternalTool {
            tool: invocation.program.clone(),
            exit_code: None,
            output: e.to_string(),
        })?;

    if !output.success() {
        return Err(PipelineError::ExternalTool {
            tool: invocation.program.clone(),
            exit_code: output.exit_code,
            output: output.output,
        });
    }
    Ok(output)
}

/// [`ToolRunner`] that spawns real processes.
///
/// Programs are located with `which` before spawning, and children are
/// killed when the future driving them is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
        let program = which::which(&invocation.program).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found in PATH: {e}", invocation.program),
            )
        })?;

        let output = Command::new(program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&invocation.dir)
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ToolOutput {
            exit_code: output.status.code(),
            output: combined,
        })
    }
}
