//! Error taxonomy shared by every component.
//!
//! Module errors stay module-local (`WorkspaceError`, `PatchError`, ...), but
//! each one maps onto an [`ErrorKind`] so structured results can carry a
//! machine-readable reason next to the human-readable message.

use serde::{Deserialize, Serialize};

/// Machine-readable failure reason carried on structured results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PathEscape,
    NotFound,
    AlreadyExists,
    IsADirectory,
    NotADirectory,
    UnsupportedFileType,
    NoSandbox,
    SandboxNotRunning,
    ExecutionTimeout,
    ExecutionFailed,
    PatchMismatch,
    InvalidArguments,
    UnknownTool,
    ModelBackendUnavailable,
    Io,
    /// A fault inside a capability (e.g. a panicking handler).
    Internal,
}

impl ErrorKind {
    /// Whether the failure was caused by the caller's input rather than by
    /// the system.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::PathEscape
                | ErrorKind::NotFound
                | ErrorKind::AlreadyExists
                | ErrorKind::IsADirectory
                | ErrorKind::NotADirectory
                | ErrorKind::UnsupportedFileType
                | ErrorKind::PatchMismatch
                | ErrorKind::InvalidArguments
                | ErrorKind::UnknownTool
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::PathEscape => "path_escape",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::IsADirectory => "is_a_directory",
            ErrorKind::NotADirectory => "not_a_directory",
            ErrorKind::UnsupportedFileType => "unsupported_file_type",
            ErrorKind::NoSandbox => "no_sandbox",
            ErrorKind::SandboxNotRunning => "sandbox_not_running",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::PatchMismatch => "patch_mismatch",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::ModelBackendUnavailable => "model_backend_unavailable",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Outcome classification at the user-facing boundary.
///
/// `BadRequest` messages are safe to show verbatim. `Internal` keeps the
/// detail for the log and exposes only a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error")]
    Internal { detail: String },
}

impl ServiceError {
    /// Build an internal error, logging the detail once.
    pub fn internal(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!("internal error: {detail}");
        ServiceError::Internal { detail }
    }

    /// HTTP-equivalent status class.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::Internal { .. } => 500,
        }
    }

    /// Message suitable for a chat transcript or API response body.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::BadRequest(msg) => msg.clone(),
            ServiceError::Internal { .. } => {
                "The request could not be completed because of an internal error.".into()
            }
        }
    }
}
