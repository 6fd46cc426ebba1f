//! Sandbox tools: `run_file` and `pip_install`.
//!
//! Both go through the project's `SandboxDriver`; neither creates or removes
//! the sandbox.

use std::sync::Arc;

use async_trait::async_trait;

use super::request::{FileArgs, PipArgs};
use super::{misrouted, ToolHandler, ToolRequest, ToolResult};
use crate::error::ErrorKind;
use crate::sandbox::{ExecOutput, SandboxDriver, SandboxError};

pub struct ShellTools {
    project_id: String,
    sandbox: Arc<SandboxDriver>,
}

impl ShellTools {
    pub fn new(project_id: String, sandbox: Arc<SandboxDriver>) -> Self {
        Self {
            project_id,
            sandbox,
        }
    }

    async fn run(&self, args: FileArgs) -> ToolResult {
        let outcome = self.sandbox.exec(&self.project_id, &args.file_path).await;
        let result = match outcome {
            Ok(out) if out.success() => {
                let message = format!("File {} executed successfully.", args.file_path);
                captured(ToolResult::success(message), out)
            }
            Ok(out) => {
                let message = format!(
                    "File {} exited with code {}.",
                    args.file_path, out.exit_code
                );
                captured(ToolResult::failure(ErrorKind::ExecutionFailed, message), out)
            }
            Err(e) => sandbox_failure(e),
        };
        result.with_file_path(args.file_path)
    }

    async fn install(&self, args: PipArgs) -> ToolResult {
        match self
            .sandbox
            .install_packages(&self.project_id, &args.packages)
            .await
        {
            Ok(out) if out.success() => captured(
                ToolResult::success(format!("Successfully installed: {}", args.packages.trim())),
                out,
            ),
            Ok(out) => captured(
                ToolResult::failure(
                    ErrorKind::ExecutionFailed,
                    format!("Package installation failed with code {}.", out.exit_code),
                ),
                out,
            ),
            Err(e) => sandbox_failure(e),
        }
    }
}

fn captured(mut result: ToolResult, out: ExecOutput) -> ToolResult {
    result.stdout = Some(out.stdout);
    result.stderr = Some(out.stderr);
    result.exit_code = Some(out.exit_code);
    result
}

fn sandbox_failure(e: SandboxError) -> ToolResult {
    let message = match &e {
        SandboxError::NoSandbox { .. } => {
            format!("{e}. Provision and start the sandbox first.")
        }
        SandboxError::NotRunning { .. } => format!("{e}. Start the sandbox first."),
        _ => e.to_string(),
    };
    ToolResult::failure(e.kind(), message)
}

#[async_trait]
impl ToolHandler for ShellTools {
    async fn handle(&self, request: ToolRequest) -> ToolResult {
        match request {
            ToolRequest::RunFile(args) => self.run(args).await,
            ToolRequest::PipInstall(args) => self.install(args).await,
            other => misrouted("sandbox tools", &other),
        }
    }
}
