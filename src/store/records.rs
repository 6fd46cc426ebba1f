//! Persisted entities: projects, reasoning sessions and steps, chat messages.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A project: a workspace root plus the identity used to name its sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub root: PathBuf,
    /// Sandbox image override.
    #[serde(default)]
    pub image: Option<String>,
}

/// One stage of the reasoning chain. Ordering follows chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Planning,
    Analysis,
    CodeGeneration,
    CodeExecution,
    Testing,
    Refinement,
    Conclusion,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Planning => "planning",
            StepType::Analysis => "analysis",
            StepType::CodeGeneration => "code_generation",
            StepType::CodeExecution => "code_execution",
            StepType::Testing => "testing",
            StepType::Refinement => "refinement",
            StepType::Conclusion => "conclusion",
        }
    }

    /// Human title used in summaries ("Code Generation").
    pub fn title(&self) -> &'static str {
        match self {
            StepType::Planning => "Planning",
            StepType::Analysis => "Analysis",
            StepType::CodeGeneration => "Code Generation",
            StepType::CodeExecution => "Code Execution",
            StepType::Testing => "Testing",
            StepType::Refinement => "Refinement",
            StepType::Conclusion => "Conclusion",
        }
    }

    /// Steps that think rather than act get no tools.
    pub fn uses_tools(&self) -> bool {
        !matches!(self, StepType::Planning | StepType::Conclusion)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningSession {
    pub id: Uuid,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub is_complete: bool,
}

/// A tool call made during a step, with the structured result it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub id: Uuid,
    pub session_id: Uuid,
    pub step_number: u32,
    pub step_type: StepType,
    pub prompt: String,
    pub response: String,
    pub model_used: String,
    pub tool_calls: Vec<RecordedToolCall>,
    pub is_complete: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReasoningStep {
    /// A pending step, not yet sent to the model.
    pub fn pending(
        session_id: Uuid,
        step_number: u32,
        step_type: StepType,
        prompt: impl Into<String>,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            step_number,
            step_type,
            prompt: prompt.into(),
            response: String::new(),
            model_used: model_used.into(),
            tool_calls: Vec::new(),
            is_complete: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Completed or failed; no further mutation allowed.
    pub fn is_final(&self) -> bool {
        self.is_complete || self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub project_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(project_id: impl Into<String>, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
