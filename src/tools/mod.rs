//! Tool registry and dispatch.
//!
//! Tools don't think, they execute. Each tool is declared once as a
//! [`ToolEntry`] (definition + handler) and the registry is built from an
//! ordered list of entries. The [`Dispatcher`] turns a model's tool call
//! (name + arguments) into a [`ToolResult`] and never lets a failure escape
//! as anything else.

pub mod file_ops;
pub mod patch;
pub mod request;
pub mod schema;
pub mod shell;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::diff::{HunkRejection, PatchMode};
use crate::error::ErrorKind;
use crate::sandbox::SandboxDriver;
use crate::workspace::{DirEntry, Workspace};

pub use request::ToolRequest;
pub use schema::{ParamSpec, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Structured outcome of one tool call. Payload fields are present only
/// when the tool produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<DirEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_changes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hunks_applied: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_hunks: Option<Vec<HunkRejection>>,
}

impl ToolResult {
    fn with_status(status: ToolStatus, message: String) -> Self {
        Self {
            status,
            message,
            kind: None,
            file_path: None,
            content: None,
            items: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            diff: None,
            has_changes: None,
            hunks_applied: None,
            skipped_hunks: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(ToolStatus::Success, message.into())
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut result = Self::with_status(ToolStatus::Error, message.into());
        result.kind = Some(kind);
        result
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
}

/// Dispatch-level failures, before or around the handler.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {0} failed unexpectedly")]
    Panicked(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            ToolError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            ToolError::Panicked(_) => ErrorKind::Internal,
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(e: ToolError) -> Self {
        ToolResult::failure(e.kind(), e.to_string())
    }
}

/// The capability behind one or more registered tools.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, request: ToolRequest) -> ToolResult;
}

/// `(name, schema, handler)` for one tool.
#[derive(Clone)]
pub struct ToolEntry {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolEntry {
    /// Declare a tool whose parameters are derived from `A`.
    pub fn new<A: JsonSchema>(
        name: &str,
        description: &str,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            definition: ToolDefinition::derive::<A>(name, description),
            handler,
        }
    }
}

/// Immutable, ordered set of tools with unique names.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: IndexMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn from_entries(entries: Vec<ToolEntry>) -> Result<Self, RegistryError> {
        let mut map = IndexMap::with_capacity(entries.len());
        for entry in entries {
            let name = entry.definition.name.clone();
            if map.contains_key(&name) {
                return Err(RegistryError::DuplicateTool(name));
            }
            map.insert(name, entry);
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.values().map(|e| e.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Arguments as they arrive from the model: already structured, or a JSON
/// string still to be parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArguments {
    Structured(Value),
    Serialized(String),
}

impl ToolArguments {
    fn into_value(self) -> Result<Value, serde_json::Error> {
        match self {
            ToolArguments::Structured(v) => Ok(v),
            ToolArguments::Serialized(s) if s.trim().is_empty() => {
                Ok(Value::Object(Default::default()))
            }
            ToolArguments::Serialized(s) => serde_json::from_str(&s),
        }
    }
}

/// Executes tool calls by name. Holds nothing but the registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one tool call. Always returns a structured result.
    pub async fn execute(&self, name: &str, arguments: ToolArguments) -> ToolResult {
        let result = match self.prepare(name, arguments) {
            Ok((entry, request)) => {
                let outcome = AssertUnwindSafe(entry.handler.handle(request))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        let detail = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_default();
                        error!(tool = %name, %detail, "tool handler panicked");
                        ToolError::Panicked(name.to_string()).into()
                    }
                }
            }
            Err(e) => e.into(),
        };

        if result.is_success() {
            info!(tool = %name, "tool executed");
        } else {
            warn!(tool = %name, kind = ?result.kind, message = %result.message, "tool failed");
        }
        result
    }

    fn prepare(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<(&ToolEntry, ToolRequest), ToolError> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: name.to_string(),
            reason,
        };

        let value = arguments.into_value().map_err(|e| invalid(e.to_string()))?;
        entry.definition.validate(&value).map_err(invalid)?;
        let request = ToolRequest::parse(name, value).map_err(|e| invalid(e.to_string()))?;
        Ok((entry, request))
    }
}

/// Per-project dependencies of the standard tool set.
#[derive(Clone)]
pub struct ToolContext {
    pub project_id: String,
    pub workspace: Workspace,
    pub sandbox: Arc<SandboxDriver>,
    pub patch_mode: PatchMode,
}

/// The full tool set offered to the model, in a fixed order.
pub fn standard_tools(ctx: ToolContext) -> Vec<ToolEntry> {
    use request::{DiffArgs, FileArgs, ListArgs, PatchArgs, PipArgs, WriteArgs};

    let files: Arc<dyn ToolHandler> = Arc::new(file_ops::FileTools::new(ctx.workspace.clone()));
    let patches: Arc<dyn ToolHandler> =
        Arc::new(patch::PatchTools::new(ctx.workspace.clone(), ctx.patch_mode));
    let shell: Arc<dyn ToolHandler> = Arc::new(shell::ShellTools::new(
        ctx.project_id.clone(),
        ctx.sandbox.clone(),
    ));

    vec![
        ToolEntry::new::<FileArgs>(
            "read_file",
            "Read the contents of a file in the project.",
            files.clone(),
        ),
        ToolEntry::new::<WriteArgs>(
            "write_file",
            "Write a file in the project, creating it or replacing its contents.",
            files.clone(),
        ),
        ToolEntry::new::<WriteArgs>(
            "create_file",
            "Create a new file. Fails if the file already exists.",
            files.clone(),
        ),
        ToolEntry::new::<WriteArgs>(
            "update_file",
            "Replace the contents of an existing file.",
            files.clone(),
        ),
        ToolEntry::new::<FileArgs>(
            "delete_file",
            "Delete a file, or a directory and everything in it.",
            files.clone(),
        ),
        ToolEntry::new::<ListArgs>(
            "list_files",
            "List the files and directories in a project directory.",
            files,
        ),
        ToolEntry::new::<FileArgs>(
            "run_file",
            "Run a source file inside the project's sandbox and capture its output.",
            shell.clone(),
        ),
        ToolEntry::new::<DiffArgs>(
            "generate_diff",
            "Produce a unified diff between two versions of a text.",
            patches.clone(),
        ),
        ToolEntry::new::<PatchArgs>(
            "apply_patch",
            "Apply a unified diff to a file in the project.",
            patches,
        ),
        ToolEntry::new::<PipArgs>(
            "pip_install",
            "Install Python packages inside the project's sandbox.",
            shell,
        ),
    ]
}

/// Result for a request routed to a handler that does not serve it.
pub(crate) fn misrouted(handler: &str, request: &ToolRequest) -> ToolResult {
    ToolResult::failure(
        ErrorKind::UnknownTool,
        format!("{} is not served by {handler}", request.name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn handle(&self, request: ToolRequest) -> ToolResult {
            match request {
                ToolRequest::ReadFile(args) => {
                    ToolResult::success("echo").with_file_path(args.file_path)
                }
                ToolRequest::ListFiles(args) => {
                    ToolResult::success(format!("listed '{}'", args.directory_path))
                }
                other => misrouted("echo", &other),
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        async fn handle(&self, _request: ToolRequest) -> ToolResult {
            panic!("secret internal detail")
        }
    }

    fn dispatcher() -> Dispatcher {
        let registry = ToolRegistry::from_entries(vec![
            ToolEntry::new::<request::FileArgs>("read_file", "echo", Arc::new(Echo)),
            ToolEntry::new::<request::FileArgs>("delete_file", "boom", Arc::new(Panics)),
            ToolEntry::new::<request::ListArgs>("list_files", "echo", Arc::new(Echo)),
        ])
        .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ToolRegistry::from_entries(vec![
            ToolEntry::new::<request::FileArgs>("read_file", "a", Arc::new(Echo)),
            ToolEntry::new::<request::FileArgs>("read_file", "b", Arc::new(Echo)),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, RegistryError::DuplicateTool(name) if name == "read_file"));
    }

    #[tokio::test]
    async fn structured_and_serialized_arguments() {
        let d = dispatcher();
        let a = d
            .execute(
                "read_file",
                ToolArguments::Structured(json!({"file_path": "a.py"})),
            )
            .await;
        let b = d
            .execute(
                "read_file",
                ToolArguments::Serialized(r#"{"file_path": "a.py"}"#.into()),
            )
            .await;
        assert!(a.is_success());
        assert_eq!(a, b);
        assert_eq!(a.file_path.as_deref(), Some("a.py"));
    }

    #[tokio::test]
    async fn unparseable_arguments_are_invalid() {
        let result = dispatcher()
            .execute("read_file", ToolArguments::Serialized("{not json".into()))
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.kind, Some(ErrorKind::InvalidArguments));
    }

    #[tokio::test]
    async fn missing_required_parameter_is_invalid() {
        let result = dispatcher()
            .execute("read_file", ToolArguments::Structured(json!({})))
            .await;
        assert_eq!(result.kind, Some(ErrorKind::InvalidArguments));
        assert!(result.message.contains("file_path"));
    }

    #[tokio::test]
    async fn null_optional_argument_is_omitted() {
        let d = dispatcher();
        let result = d
            .execute(
                "list_files",
                ToolArguments::Structured(json!({"directory_path": null})),
            )
            .await;
        assert!(result.is_success(), "{}", result.message);
        assert_eq!(result.message, "listed ''");

        let result = d
            .execute(
                "list_files",
                ToolArguments::Serialized(r#"{"directory_path": null}"#.into()),
            )
            .await;
        assert!(result.is_success());

        let result = d
            .execute("read_file", ToolArguments::Structured(json!({"file_path": null})))
            .await;
        assert_eq!(result.kind, Some(ErrorKind::InvalidArguments));
    }

    #[tokio::test]
    async fn unknown_tool() {
        let result = dispatcher()
            .execute("format_disk", ToolArguments::Structured(json!({})))
            .await;
        assert_eq!(result.kind, Some(ErrorKind::UnknownTool));
        assert_eq!(result.message, "Unknown tool: format_disk");
    }

    #[tokio::test]
    async fn panicking_handler_becomes_error_result() {
        let result = dispatcher()
            .execute(
                "delete_file",
                ToolArguments::Structured(json!({"file_path": "x"})),
            )
            .await;
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.kind, Some(ErrorKind::Internal));
        assert!(!result.message.contains("secret"));
    }

    #[test]
    fn result_serialization_omits_empty_payload() {
        let json = serde_json::to_value(ToolResult::success("done")).unwrap();
        assert_eq!(json, json!({"status": "success", "message": "done"}));

        let json =
            serde_json::to_value(ToolResult::failure(ErrorKind::NotFound, "missing")).unwrap();
        assert_eq!(json["kind"], "not_found");
    }
}
