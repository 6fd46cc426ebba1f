//! Typed tool requests: one argument struct per tool shape, and the tagged
//! union the dispatcher deserializes into.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileArgs {
    /// Path of the file, relative to the project root.
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WriteArgs {
    /// Path of the file, relative to the project root.
    pub file_path: String,
    /// Full text to write.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ListArgs {
    /// Directory to list, relative to the project root. Defaults to the root.
    #[serde(default)]
    pub directory_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DiffArgs {
    /// Text before the change.
    pub original_content: String,
    /// Text after the change.
    pub new_content: String,
    /// File name to show in the diff header.
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PatchArgs {
    /// File to patch, relative to the project root.
    pub file_path: String,
    /// Unified diff to apply.
    pub patch_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PipArgs {
    /// Space-separated package specs, e.g. "requests numpy>=1.26".
    pub packages: String,
}

/// Every tool call the standard tool set understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolRequest {
    ReadFile(FileArgs),
    WriteFile(WriteArgs),
    CreateFile(WriteArgs),
    UpdateFile(WriteArgs),
    DeleteFile(FileArgs),
    ListFiles(ListArgs),
    RunFile(FileArgs),
    GenerateDiff(DiffArgs),
    ApplyPatch(PatchArgs),
    PipInstall(PipArgs),
}

impl ToolRequest {
    /// Build a request from a tool name and its argument object. Explicit
    /// `null` arguments count as omitted.
    pub fn parse(name: &str, mut arguments: Value) -> Result<Self, serde_json::Error> {
        if let Some(object) = arguments.as_object_mut() {
            object.retain(|_, value| !value.is_null());
        }
        serde_json::from_value(json!({ "name": name, "arguments": arguments }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::ReadFile(_) => "read_file",
            ToolRequest::WriteFile(_) => "write_file",
            ToolRequest::CreateFile(_) => "create_file",
            ToolRequest::UpdateFile(_) => "update_file",
            ToolRequest::DeleteFile(_) => "delete_file",
            ToolRequest::ListFiles(_) => "list_files",
            ToolRequest::RunFile(_) => "run_file",
            ToolRequest::GenerateDiff(_) => "generate_diff",
            ToolRequest::ApplyPatch(_) => "apply_patch",
            ToolRequest::PipInstall(_) => "pip_install",
        }
    }
}
