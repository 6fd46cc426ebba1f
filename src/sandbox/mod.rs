//! Execution sandbox: one idle container per project, with the project's
//! workspace bind-mounted, used to run project code and install packages.

pub mod driver;
pub mod languages;
pub mod runtime;
#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::workspace::WorkspaceError;

pub use driver::SandboxDriver;
pub use languages::Language;
pub use runtime::{ContainerRuntime, ContainerSpec, DockerCli, ExecOutput, RuntimeError};

/// Lifecycle: `absent -> created -> running -> stopped`, `remove` back to absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Absent,
    Created,
    Running,
    Stopped,
}

impl SandboxStatus {
    /// Map a runtime state string (`docker inspect` `.State.Status`).
    pub fn from_runtime_state(state: &str) -> Self {
        match state.trim() {
            "created" => SandboxStatus::Created,
            "running" | "restarting" => SandboxStatus::Running,
            "" | "removing" => SandboxStatus::Absent,
            _ => SandboxStatus::Stopped,
        }
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SandboxStatus::Absent => "absent",
            SandboxStatus::Created => "created",
            SandboxStatus::Running => "running",
            SandboxStatus::Stopped => "stopped",
        })
    }
}

/// The project's stored reference to its container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub container_id: String,
    pub status: SandboxStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("unsupported file type: {path}")]
    UnsupportedFileType { path: String },

    #[error("no sandbox exists for project {project_id}")]
    NoSandbox { project_id: String },

    #[error("sandbox is not running (status: {status})")]
    NotRunning { status: SandboxStatus },

    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("invalid package specification: {0}")]
    InvalidPackage(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::UnsupportedFileType { .. } => ErrorKind::UnsupportedFileType,
            SandboxError::NoSandbox { .. } => ErrorKind::NoSandbox,
            SandboxError::NotRunning { .. } => ErrorKind::SandboxNotRunning,
            SandboxError::Timeout { .. } => ErrorKind::ExecutionTimeout,
            SandboxError::InvalidPackage(_) => ErrorKind::InvalidArguments,
            SandboxError::Workspace(e) => e.kind(),
            SandboxError::Runtime(RuntimeError::NotFound(_)) => ErrorKind::NoSandbox,
            SandboxError::Runtime(RuntimeError::Timeout(_)) => ErrorKind::ExecutionTimeout,
            SandboxError::Runtime(_) => ErrorKind::ExecutionFailed,
        }
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;

/// Container name derived from project identity.
pub fn container_name(project_id: &str, title: &str) -> String {
    format!(
        "project_{}_{}",
        project_id,
        title.to_lowercase().replace(' ', "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_states_map_to_lifecycle() {
        assert_eq!(SandboxStatus::from_runtime_state("running\n"), SandboxStatus::Running);
        assert_eq!(SandboxStatus::from_runtime_state("created"), SandboxStatus::Created);
        assert_eq!(SandboxStatus::from_runtime_state("exited"), SandboxStatus::Stopped);
        assert_eq!(SandboxStatus::from_runtime_state("paused"), SandboxStatus::Stopped);
        assert_eq!(SandboxStatus::from_runtime_state("dead"), SandboxStatus::Stopped);
    }

    #[test]
    fn container_name_is_derived_from_title() {
        assert_eq!(container_name("42", "My Cool App"), "project_42_my_cool_app");
    }

    #[test]
    fn errors_map_to_kinds() {
        let err = SandboxError::NotRunning {
            status: SandboxStatus::Stopped,
        };
        assert_eq!(err.kind(), ErrorKind::SandboxNotRunning);
        assert_eq!(err.to_string(), "sandbox is not running (status: stopped)");
        assert_eq!(
            SandboxError::Runtime(RuntimeError::Timeout(std::time::Duration::from_secs(1))).kind(),
            ErrorKind::ExecutionTimeout
        );
        assert_eq!(
            SandboxError::Runtime(RuntimeError::Failed("boom".into())).kind(),
            ErrorKind::ExecutionFailed
        );
    }
}
