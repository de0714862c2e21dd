//! Subprocess execution for tool stages

use crate::task::{TaskError, TaskInvocation, TaskOutcome};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Env var naming the file a tool writes `key=value` outputs to
pub const OUTPUT_ENV: &str = "STAGERUN_OUTPUT";
/// Env var naming the file a tool writes `name=uri` artifact lines to
pub const ARTIFACTS_ENV: &str = "STAGERUN_ARTIFACTS";
/// Prefix for rendered stage inputs exported to the tool
pub const INPUT_ENV_PREFIX: &str = "STAGERUN_INPUT_";

/// Lines of stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// A program plus arguments to run for a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
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
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Per-attempt scratch directory, removed on drop
#[derive(Debug)]
pub struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    pub async fn create() -> Result<Self, TaskError> {
        let dir = std::env::temp_dir().join(format!("stagerun-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TaskError::Internal(format!("Failed to create scratch dir: {}", e)))?;
        Ok(Self { dir })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn outputs_file(&self) -> PathBuf {
        self.path("outputs")
    }

    pub fn artifacts_file(&self) -> PathBuf {
        self.path("artifacts")
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            debug!("Could not remove {}: {}", self.dir.display(), e);
        }
    }
}

/// `build-args` -> `STAGERUN_INPUT_BUILD_ARGS`
pub fn input_env_name(input: &str) -> String {
    let name: String = input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}{}", INPUT_ENV_PREFIX, name)
}

/// Parse `key=value` lines, ignoring blanks and `#` comments
pub fn parse_key_values(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

async fn read_optional(path: &Path) -> Result<String, TaskError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(TaskError::Internal(format!("Failed to read {}: {}", path.display(), e))),
    }
}

/// Runs a [`CommandLine`] as a child process
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    /// Default working directory for commands that don't set one
    working_dir: Option<PathBuf>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run the command until it exits or the invocation is cancelled
    ///
    /// Stage inputs become `STAGERUN_INPUT_*` variables and scoped secrets
    /// are exported under their own names. Run secrets the stage did not
    /// declare are removed from the inherited environment. Outputs and artifacts are read
    /// back from the files named by `STAGERUN_OUTPUT` and `STAGERUN_ARTIFACTS`.
    pub async fn run(
        &self,
        command_line: &CommandLine,
        invocation: &TaskInvocation,
        scratch: &Scratch,
    ) -> Result<TaskOutcome, TaskError> {
        debug!(
            "Stage {} attempt {}: spawning {} {:?}",
            invocation.stage_id, invocation.attempt, command_line.program, command_line.args
        );

        let mut command = Command::new(&command_line.program);
        command
            .args(&command_line.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("STAGERUN_STAGE", &invocation.stage_id)
            .env("STAGERUN_ATTEMPT", invocation.attempt.to_string())
            .env(OUTPUT_ENV, scratch.outputs_file())
            .env(ARTIFACTS_ENV, scratch.artifacts_file());

        for (name, value) in &invocation.inputs {
            command.env(input_env_name(name), value);
        }
        // Secrets loaded from our own environment would otherwise leak through
        for name in invocation.secrets.withheld() {
            command.env_remove(name);
        }
        for (name, value) in invocation.secrets.iter() {
            command.env(name, value.expose());
        }
        command.envs(&command_line.env);

        if let Some(dir) = command_line.working_dir.as_ref().or(self.working_dir.as_ref()) {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| TaskError::Spawn(format!("{}: {}", command_line.program, e)))?;

        // Dropping the child on cancellation kills it
        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| TaskError::Internal(format!("Failed to wait for {}: {}", command_line.program, e)))?
            }
            _ = invocation.cancel.cancelled() => {
                debug!("Stage {} cancelled, killing {}", invocation.stage_id, command_line.program);
                return Err(TaskError::Cancelled);
            }
        };

        let stdout = invocation.secrets.redact(&String::from_utf8_lossy(&output.stdout));
        let stderr = invocation.secrets.redact(&String::from_utf8_lossy(&output.stderr));
        for line in stdout.lines() {
            debug!(stage = %invocation.stage_id, "{}", line);
        }

        let mut outcome = if output.status.success() {
            TaskOutcome::success()
        } else {
            let exit_code = output.status.code();
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            warn!(
                "Stage {}: {} exited with code {}",
                invocation.stage_id,
                command_line.program,
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
            );
            let message = if tail.is_empty() {
                format!("{} exited with code {:?}", command_line.program, exit_code)
            } else {
                tail.join("\n")
            };
            TaskOutcome::failure(exit_code, message)
        };

        for (key, value) in parse_key_values(&read_optional(&scratch.outputs_file()).await?) {
            outcome = outcome.with_output(key, value);
        }
        for (name, uri) in parse_key_values(&read_optional(&scratch.artifacts_file()).await?) {
            outcome = outcome.with_artifact(name, uri);
        }

        Ok(outcome)
    }
}
