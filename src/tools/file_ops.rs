//! File tools over the project workspace.

use async_trait::async_trait;

use super::request::{FileArgs, ListArgs, WriteArgs};
use super::{misrouted, ToolHandler, ToolRequest, ToolResult};
use crate::workspace::{Workspace, WorkspaceError};

/// Serves read/write/create/update/delete/list.
pub struct FileTools {
    workspace: Workspace,
}

impl FileTools {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    async fn read(&self, args: FileArgs) -> Result<ToolResult, WorkspaceError> {
        let file = self.workspace.read(&args.file_path).await?;
        let mut result = ToolResult::success(format!("File {} read successfully.", file.path))
            .with_file_path(file.path);
        result.content = Some(file.content);
        Ok(result)
    }

    /// Update when the file exists, create otherwise.
    async fn write(&self, args: WriteArgs) -> Result<ToolResult, WorkspaceError> {
        let outcome = if self.workspace.exists(&args.file_path).await {
            self.workspace.update(&args.file_path, &args.content).await?
        } else {
            self.workspace.create(&args.file_path, &args.content).await?
        };
        Ok(ToolResult::success(outcome.message).with_file_path(outcome.path))
    }

    async fn create(&self, args: WriteArgs) -> Result<ToolResult, WorkspaceError> {
        let outcome = self.workspace.create(&args.file_path, &args.content).await?;
        Ok(ToolResult::success(outcome.message).with_file_path(outcome.path))
    }

    async fn update(&self, args: WriteArgs) -> Result<ToolResult, WorkspaceError> {
        let outcome = self.workspace.update(&args.file_path, &args.content).await?;
        Ok(ToolResult::success(outcome.message).with_file_path(outcome.path))
    }

    async fn delete(&self, args: FileArgs) -> Result<ToolResult, WorkspaceError> {
        let outcome = self.workspace.delete(&args.file_path).await?;
        Ok(ToolResult::success(outcome.message).with_file_path(outcome.path))
    }

    async fn list(&self, args: ListArgs) -> Result<ToolResult, WorkspaceError> {
        let listing = self.workspace.list(&args.directory_path).await?;
        let shown = if listing.path.is_empty() { "." } else { listing.path.as_str() };
        let mut result = ToolResult::success(format!(
            "Found {} item(s) in {shown}.",
            listing.entries.len()
        ))
        .with_file_path(listing.path.clone());
        result.items = Some(listing.entries);
        Ok(result)
    }
}

fn failed(e: WorkspaceError) -> ToolResult {
    ToolResult::failure(e.kind(), e.to_string()).with_file_path(e.path())
}

#[async_trait]
impl ToolHandler for FileTools {
    async fn handle(&self, request: ToolRequest) -> ToolResult {
        let outcome = match request {
            ToolRequest::ReadFile(args) => self.read(args).await,
            ToolRequest::WriteFile(args) => self.write(args).await,
            ToolRequest::CreateFile(args) => self.create(args).await,
            ToolRequest::UpdateFile(args) => self.update(args).await,
            ToolRequest::DeleteFile(args) => self.delete(args).await,
            ToolRequest::ListFiles(args) => self.list(args).await,
            other => return misrouted("file tools", &other),
        };
        outcome.unwrap_or_else(failed)
    }
}
