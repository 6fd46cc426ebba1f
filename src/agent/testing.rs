//! Test doubles for the agent layer.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::backend::{AgentFramework, FrameworkError, FrameworkOutput, FrameworkStep};
use crate::config::SandboxConfig;
use crate::diff::PatchMode;
use crate::llm::{Completion, CompletionModel, CompletionRequest, LlmError, ToolCall};
use crate::notify::{NotifyError, Notifier, ProgressEvent};
use crate::sandbox::testing::FakeRuntime;
use crate::sandbox::SandboxDriver;
use crate::store::{RecordedToolCall, StepType};
use crate::tools::{standard_tools, Dispatcher, ToolArguments, ToolContext, ToolRegistry};
use crate::workspace::Workspace;

/// Workspace at `root` and a dispatcher over the standard tools for
/// project `p1`, backed by a fake container runtime.
pub fn standard_dispatcher(root: &Path) -> (Workspace, Arc<Dispatcher>) {
    let workspace = Workspace::open(root);
    let sandbox = Arc::new(SandboxDriver::new(FakeRuntime::new(), SandboxConfig::default()));
    let tools = standard_tools(ToolContext {
        project_id: "p1".into(),
        workspace: workspace.clone(),
        sandbox,
        patch_mode: PatchMode::Strict,
    });
    let registry = ToolRegistry::from_entries(tools).unwrap();
    (workspace, Arc::new(Dispatcher::new(Arc::new(registry))))
}

pub fn text(content: &str) -> Completion {
    Completion {
        content: content.to_string(),
        tool_calls: Vec::new(),
    }
}

pub fn call(content: &str, calls: &[(&str, Value)]) -> Completion {
    Completion {
        content: content.to_string(),
        tool_calls: calls
            .iter()
            .enumerate()
            .map(|(i, (name, args))| ToolCall {
                id: format!("call_{i}"),
                name: name.to_string(),
                arguments: args.clone(),
            })
            .collect(),
    }
}

/// Replies from a queue; once empty, repeats `always` or answers "ok".
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Completion, LlmError>>>,
    always: Option<Completion>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<Completion, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            always: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(reply: Completion) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            always: Some(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match (next, &self.always) {
            (Some(reply), _) => reply,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Ok(text("ok")),
        }
    }
}

/// Agent framework that answers each step with a canned line, optionally
/// calling one tool first and optionally failing on one step type.
pub struct FakeFramework {
    init_error: Option<String>,
    fail_on: Option<StepType>,
    tool: Option<(String, Value)>,
    steps: Mutex<Vec<(StepType, usize)>>,
}

impl FakeFramework {
    fn build(init_error: Option<String>) -> Self {
        Self {
            init_error,
            fail_on: None,
            tool: None,
            steps: Mutex::new(Vec::new()),
        }
    }

    pub fn ready() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    pub fn broken(reason: &str) -> Arc<Self> {
        Arc::new(Self::build(Some(reason.to_string())))
    }

    pub fn failing_on(step_type: StepType) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(step_type),
            ..Self::build(None)
        })
    }

    pub fn calling(tool: &str, arguments: Value) -> Arc<Self> {
        Arc::new(Self {
            tool: Some((tool.to_string(), arguments)),
            ..Self::build(None)
        })
    }

    /// Step types seen, with how many tools each was offered.
    pub fn steps(&self) -> Vec<(StepType, usize)> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentFramework for FakeFramework {
    fn name(&self) -> &str {
        "fake"
    }

    fn initialize(&self) -> Result<(), FrameworkError> {
        match &self.init_error {
            Some(reason) => Err(FrameworkError(reason.clone())),
            None => Ok(()),
        }
    }

    async fn run_step(&self, step: FrameworkStep<'_>) -> Result<FrameworkOutput, FrameworkError> {
        self.steps
            .lock()
            .unwrap()
            .push((step.step_type, step.tools.len()));
        if self.fail_on == Some(step.step_type) {
            return Err(FrameworkError(format!("{} exploded", step.step_type)));
        }

        let mut tool_calls = Vec::new();
        if let (Some((name, args)), false) = (&self.tool, step.tools.is_empty()) {
            let result = step
                .dispatcher
                .execute(name, ToolArguments::Structured(args.clone()))
                .await;
            tool_calls.push(RecordedToolCall {
                name: name.clone(),
                arguments: args.clone(),
                result: serde_json::to_value(&result).unwrap(),
            });
        }
        Ok(FrameworkOutput {
            response: format!("{} done by framework", step.step_type),
            tool_calls,
        })
    }
}

/// Records every event; optionally fails every publish.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, ProgressEvent)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<(String, ProgressEvent)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, group: &str, event: ProgressEvent) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Closed(group.to_string()));
        }
        self.events.lock().unwrap().push((group.to_string(), event));
        Ok(())
    }
}
