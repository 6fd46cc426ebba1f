//! Container runtime seam.
//!
//! `SandboxDriver` only talks to containers through [`ContainerRuntime`];
//! [`DockerCli`] shells out to a docker-compatible CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::SandboxStatus;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("runtime command failed: {0}")]
    Failed(String),

    #[error("failed to run container runtime: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to create one sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub host_dir: PathBuf,
    pub mount_point: String,
    pub working_dir: String,
    pub env: Vec<(String, String)>,
    pub command: Vec<String>,
}

/// Captured result of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Container id for an exact name, if one exists in any state.
    async fn find_by_name(&self, name: &str) -> Result<Option<String>, RuntimeError>;

    /// Create (but do not start) a container; returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    async fn inspect_status(&self, id: &str) -> Result<SandboxStatus, RuntimeError>;

    /// Run `argv` in the container. Exceeding `timeout` is `RuntimeError::Timeout`;
    /// a non-zero exit is an `Ok` with the exit code.
    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, RuntimeError>;
}

/// Docker (or podman) via its command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    /// Bound for lifecycle commands; exec uses the caller's timeout.
    control_timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            control_timeout: Duration::from_secs(60),
        }
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<ExecOutput, RuntimeError> {
        debug!(binary = %self.binary, ?args, "container runtime call");
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| RuntimeError::Timeout(timeout))??;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run a lifecycle command; non-zero exit becomes an error.
    async fn control(&self, args: Vec<String>, id: &str) -> Result<String, RuntimeError> {
        let out = self.run(&args, self.control_timeout).await?;
        if out.success() {
            return Ok(out.stdout.trim().to_string());
        }
        if is_missing(&out.stderr) {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Err(RuntimeError::Failed(out.stderr.trim().to_string()))
    }
}

fn is_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Argument list for `docker create`.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = strings(&["create", "--name", &spec.name]);
    args.push("-v".into());
    args.push(format!("{}:{}:rw", spec.host_dir.display(), spec.mount_point));
    args.push("-w".into());
    args.push(spec.working_dir.clone());
    for (key, value) in &spec.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn find_by_name(&self, name: &str) -> Result<Option<String>, RuntimeError> {
        let filter = format!("name=^/{name}$");
        let args = strings(&["ps", "-a", "--filter", &filter, "--format", "{{.ID}}"]);
        let id = self.control(args, name).await?;
        Ok(id.lines().next().map(str::to_string).filter(|s| !s.is_empty()))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.control(create_args(spec), &spec.name).await
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.control(strings(&["start", id]), id).await.map(|_| ())
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.control(strings(&["stop", id]), id).await.map(|_| ())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let args = if force {
            strings(&["rm", "-f", id])
        } else {
            strings(&["rm", id])
        };
        self.control(args, id).await.map(|_| ())
    }

    async fn inspect_status(&self, id: &str) -> Result<SandboxStatus, RuntimeError> {
        let args = strings(&["inspect", "-f", "{{.State.Status}}", id]);
        let state = self.control(args, id).await?;
        Ok(SandboxStatus::from_runtime_state(&state))
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, RuntimeError> {
        let mut args = strings(&["exec", id]);
        args.extend(argv.iter().cloned());
        let out = self.run(&args, timeout).await?;
        // `docker exec` itself reports a vanished container with exit 1.
        if !out.success() && out.stdout.is_empty() && is_missing(&out.stderr) {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Ok(out)
    }
}
