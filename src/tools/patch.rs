//! Diff tools: `generate_diff` and `apply_patch`.

use async_trait::async_trait;

use super::request::{DiffArgs, PatchArgs};
use super::{misrouted, ToolHandler, ToolRequest, ToolResult};
use crate::diff::{self, PatchError, PatchMode};
use crate::workspace::Workspace;

pub struct PatchTools {
    workspace: Workspace,
    mode: PatchMode,
}

impl PatchTools {
    pub fn new(workspace: Workspace, mode: PatchMode) -> Self {
        Self { workspace, mode }
    }

    fn generate(&self, args: DiffArgs) -> ToolResult {
        let outcome = diff::generate_diff(
            &args.original_content,
            &args.new_content,
            args.file_path.as_deref(),
        );
        let message = if outcome.has_changes {
            "Diff generated successfully."
        } else {
            "No differences found."
        };
        let mut result = ToolResult::success(message);
        result.file_path = args.file_path;
        result.diff = Some(outcome.diff);
        result.has_changes = Some(outcome.has_changes);
        result
    }

    async fn apply(&self, args: PatchArgs) -> ToolResult {
        match diff::apply_patch(&self.workspace, &args.file_path, &args.patch_content, self.mode)
            .await
        {
            Ok(outcome) => {
                let message = if outcome.skipped.is_empty() {
                    format!("Patch applied successfully to {}.", outcome.path)
                } else {
                    format!(
                        "Patch applied to {} with {} hunk(s) skipped.",
                        outcome.path,
                        outcome.skipped.len()
                    )
                };
                let mut result = ToolResult::success(message).with_file_path(outcome.path);
                result.hunks_applied = Some(outcome.hunks_applied);
                if !outcome.skipped.is_empty() {
                    result.skipped_hunks = Some(outcome.skipped);
                }
                result
            }
            Err(e) => {
                let mut result = ToolResult::failure(e.kind(), e.to_string())
                    .with_file_path(args.file_path);
                if let PatchError::Mismatch { rejected, .. } = e {
                    result.skipped_hunks = Some(rejected);
                }
                result
            }
        }
    }
}

#[async_trait]
impl ToolHandler for PatchTools {
    async fn handle(&self, request: ToolRequest) -> ToolResult {
        match request {
            ToolRequest::GenerateDiff(args) => self.generate(args),
            ToolRequest::ApplyPatch(args) => self.apply(args).await,
            other => misrouted("patch tools", &other),
        }
    }
}
