//! Coding agent: turns a chat message into a reasoning session.
//!
//! ## Architecture
//!
//! - `backend`: orchestrator backends and priority-based fallback
//! - `chain`: the step state machine (`planning -> ... -> conclusion`)
//! - `classify`: which steps a task needs, and whether it is multi-step
//! - `plan`: parsing the planning step's output
//! - `prompts`: system prompts and per-step prompts
//! - `tool_loop`: bounded tool-call loop for direct-API steps
//!
//! [`Orchestrator::handle_task`] is the entry point. Each fallback it takes
//! is recorded in the project's chat as a system message.

pub mod backend;
pub mod chain;
pub mod classify;
pub mod plan;
pub mod prompts;
pub mod tool_loop;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

pub use backend::{
    select_backend, AgentFramework, Backend, BackendDeps, BackendInitError, OrchestratorBackend,
};
pub use chain::{ChainError, ReasoningChain, StepEngine, TaskInput};

use crate::config::AgentConfig;
use crate::error::ServiceError;
use crate::llm::types::resolve_model;
use crate::llm::{CompletionModel, CompletionRequest, ToolChoice, Turn};
use crate::notify::Notifier;
use crate::store::{ChatMessage, ChatRole, RecordStore, RecordedToolCall, ReasoningStep};
use crate::tools::Dispatcher;

const CHAT_SYSTEM_PROMPT: &str = "\
You are a helpful coding assistant working inside the user's project. \
Answer questions about the code clearly and concisely.";

/// Recent chat messages sent with a plain chat turn.
const CHAT_HISTORY: usize = 10;

/// Step responses longer than this are cut in the summary.
const SUMMARY_PREVIEW_CHARS: usize = 500;

/// What the user gets back for one message.
#[derive(Debug, Clone)]
pub struct TaskReply {
    pub backend: OrchestratorBackend,
    pub message: String,
    /// Present when a reasoning chain ran to completion.
    pub session_id: Option<Uuid>,
    /// Every tool call made by the chain, in order.
    pub tool_calls: Vec<RecordedToolCall>,
}

/// Routes a project's chat messages to a reasoning chain or plain chat.
pub struct Orchestrator {
    project_id: String,
    config: AgentConfig,
    deps: BackendDeps,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
}

fn store_failure(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::internal(format!("record store: {e}"))
}

impl Orchestrator {
    pub fn new(
        project_id: impl Into<String>,
        config: AgentConfig,
        deps: BackendDeps,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            config,
            deps,
            dispatcher,
            store,
            notifier,
        }
    }

    /// Handle one chat message end to end.
    pub async fn handle_task(&self, task: TaskInput) -> Result<TaskReply, ServiceError> {
        if task.description.trim().is_empty() {
            return Err(ServiceError::BadRequest("message must not be empty".into()));
        }
        self.record(ChatRole::User, &task.description).await?;

        if !classify::is_multi_step_task(&task.description) {
            let Some(model) = self.deps.model.clone() else {
                return self.unavailable("no completion model is configured").await;
            };
            return self.plain_chat(model, &task).await;
        }

        let selection = match select_backend(&self.config.chain.backends, &self.deps) {
            Ok(selection) => selection,
            Err(e) => return self.unavailable(&e.to_string()).await,
        };
        for skipped in &selection.skipped {
            self.record(ChatRole::System, &skipped.notice()).await?;
        }

        let engine = match &selection.backend {
            Backend::Framework { framework, .. } => StepEngine::Framework(framework.clone()),
            Backend::DirectApi(model) => StepEngine::Direct(model.clone()),
            Backend::PlainChat(model) => return self.plain_chat(model.clone(), &task).await,
        };

        match self.run_chain(engine, &task).await {
            Ok((session_id, steps)) => {
                let message = summarize(session_id, &steps);
                self.record(ChatRole::Assistant, &message).await?;
                Ok(TaskReply {
                    backend: selection.backend.kind(),
                    message,
                    session_id: Some(session_id),
                    tool_calls: steps.into_iter().flat_map(|s| s.tool_calls).collect(),
                })
            }
            Err(e) => {
                warn!(project = %self.project_id, error = %e, "reasoning chain failed");
                let notice = format!(
                    "The reasoning system encountered an error: {e}. Falling back to regular chat."
                );
                self.record(ChatRole::System, &notice).await?;
                match selection.backend.chat_model() {
                    Some(model) => self.plain_chat(model, &task).await,
                    None => Err(ServiceError::internal(e.to_string())),
                }
            }
        }
    }

    async fn run_chain(
        &self,
        engine: StepEngine,
        task: &TaskInput,
    ) -> Result<(Uuid, Vec<ReasoningStep>), ChainError> {
        let chain = ReasoningChain::new(
            self.project_id.clone(),
            engine,
            self.dispatcher.clone(),
            self.store.clone(),
            self.notifier.clone(),
            &self.config,
        );
        let mut session = chain.create_session(&task.description).await?;
        let steps = chain.run(&mut session, task).await?;
        Ok((session.id, steps))
    }

    /// Single model turn over recent chat history, no tools.
    async fn plain_chat(
        &self,
        model: Arc<dyn CompletionModel>,
        task: &TaskInput,
    ) -> Result<TaskReply, ServiceError> {
        let messages = self
            .store
            .chat_messages(&self.project_id)
            .await
            .map_err(store_failure)?;
        let history = chat_history(&messages);

        let mut system = CHAT_SYSTEM_PROMPT.to_string();
        if let Some(file) = &task.current_file {
            system.push_str(&format!("\n\nThe user is currently working on: {file}"));
            if let Some(content) = &task.current_file_content {
                system.push_str(&format!("\n\n```\n{content}\n```"));
            }
        }

        let request = CompletionRequest {
            model: resolve_model(&self.config.llm.tool_model).to_string(),
            system,
            history,
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
        };
        let completion = match model.complete(request).await {
            Ok(c) => c,
            Err(e) => {
                self.record(ChatRole::System, &format!("Error contacting the language model: {e}"))
                    .await?;
                return Err(ServiceError::internal(e.to_string()));
            }
        };

        info!(project = %self.project_id, "answered with plain chat");
        self.record(ChatRole::Assistant, &completion.content).await?;
        Ok(TaskReply {
            backend: OrchestratorBackend::PlainChat,
            message: completion.content,
            session_id: None,
            tool_calls: Vec::new(),
        })
    }

    async fn unavailable(&self, reason: &str) -> Result<TaskReply, ServiceError> {
        self.record(
            ChatRole::System,
            "No language model backend is available. Please check the configuration.",
        )
        .await?;
        Err(ServiceError::internal(reason.to_string()))
    }

    async fn record(&self, role: ChatRole, content: &str) -> Result<(), ServiceError> {
        self.store
            .append_chat_message(ChatMessage::new(self.project_id.clone(), role, content))
            .await
            .map_err(store_failure)
    }
}

/// Last user/assistant messages as model turns, starting with a user turn.
fn chat_history(messages: &[ChatMessage]) -> Vec<Turn> {
    let turns: Vec<Turn> = messages
        .iter()
        .filter_map(|m| match m.role {
            ChatRole::User => Some(Turn::User(m.content.clone())),
            ChatRole::Assistant => Some(Turn::Assistant {
                text: m.content.clone(),
                tool_calls: Vec::new(),
            }),
            ChatRole::System => None,
        })
        .collect();
    let recent = &turns[turns.len().saturating_sub(CHAT_HISTORY)..];
    recent
        .iter()
        .skip_while(|t| !matches!(t, Turn::User(_)))
        .cloned()
        .collect()
}

/// Chat reply listing each step of a finished session.
pub fn summarize(session_id: Uuid, steps: &[ReasoningStep]) -> String {
    let mut out = String::from("I've analyzed your request and broken it down into steps:\n\n");
    for step in steps {
        out.push_str(&format!(
            "**Step {}: {}**\n",
            step.step_number,
            step.step_type.title()
        ));
        if step.response.chars().count() > SUMMARY_PREVIEW_CHARS {
            let head: String = step.response.chars().take(SUMMARY_PREVIEW_CHARS).collect();
            out.push_str(&head);
            out.push_str("...\n[Response truncated for readability]");
        } else {
            out.push_str(&step.response);
        }
        out.push_str("\n\n");
    }
    out.push_str(&format!("Reasoning session: {session_id}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{
        standard_dispatcher, text, FakeFramework, RecordingNotifier, ScriptedModel,
    };
    use crate::llm::LlmError;
    use crate::store::{MemoryStore, StepType};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        orchestrator: Orchestrator,
    }

    fn fixture(deps: BackendDeps) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (_workspace, dispatcher) = standard_dispatcher(dir.path());
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(
            "p1",
            AgentConfig::default(),
            deps,
            dispatcher,
            store.clone(),
            RecordingNotifier::new(),
        );
        Fixture {
            _dir: dir,
            store,
            orchestrator,
        }
    }

    fn deps(
        model: Option<Arc<ScriptedModel>>,
        framework: Option<Arc<FakeFramework>>,
    ) -> BackendDeps {
        BackendDeps {
            framework: framework.map(|f| f as Arc<dyn AgentFramework>),
            model: model.map(|m| m as Arc<dyn CompletionModel>),
        }
    }

    async fn chat(fx: &Fixture) -> Vec<(ChatRole, String)> {
        fx.store
            .chat_messages("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    #[tokio::test]
    async fn simple_question_uses_plain_chat() {
        let model = ScriptedModel::new(vec![Ok(text("It sorts the list."))]);
        let fx = fixture(deps(Some(model.clone()), None));
        let reply = fx
            .orchestrator
            .handle_task(TaskInput::new("What does sort_items do?"))
            .await
            .unwrap();

        assert_eq!(reply.backend, OrchestratorBackend::PlainChat);
        assert_eq!(reply.message, "It sorts the list.");
        assert!(reply.session_id.is_none());
        assert_eq!(
            chat(&fx).await,
            vec![
                (ChatRole::User, "What does sort_items do?".to_string()),
                (ChatRole::Assistant, "It sorts the list.".to_string()),
            ]
        );
        let request = &model.requests()[0];
        assert_eq!(request.tool_choice, ToolChoice::None);
        assert_eq!(request.history.len(), 1);
    }

    #[tokio::test]
    async fn missing_framework_falls_back_to_direct_api() {
        let model = ScriptedModel::new(vec![]);
        let fx = fixture(deps(Some(model), None));
        let reply = fx
            .orchestrator
            .handle_task(TaskInput::new("Create and run a script that prints primes"))
            .await
            .unwrap();

        assert_eq!(reply.backend, OrchestratorBackend::DirectApi);
        let session_id = reply.session_id.unwrap();
        assert!(fx.store.session(session_id).await.unwrap().is_complete);
        assert!(reply
            .message
            .starts_with("I've analyzed your request and broken it down into steps:"));
        assert!(reply.message.contains("**Step 2: Code Generation**"));

        let messages = chat(&fx).await;
        assert_eq!(messages[1].0, ChatRole::System);
        assert!(messages[1].1.contains("simplified reasoning system"));
        assert_eq!(messages.last().unwrap().0, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn ready_framework_runs_the_chain() {
        let model = ScriptedModel::new(vec![]);
        let framework = FakeFramework::ready();
        let fx = fixture(deps(Some(model.clone()), Some(framework.clone())));
        let reply = fx
            .orchestrator
            .handle_task(TaskInput::new("Build a CLI that counts words"))
            .await
            .unwrap();

        assert_eq!(reply.backend, OrchestratorBackend::FrameworkBacked);
        assert_eq!(framework.steps().first().map(|s| s.0), Some(StepType::Planning));
        assert!(model.requests().is_empty());
        assert!(chat(&fx).await.iter().all(|(role, _)| *role != ChatRole::System));
    }

    #[tokio::test]
    async fn failed_chain_falls_back_to_chat() {
        let model = ScriptedModel::new(vec![
            Ok(text("1. Write it")),
            Err(LlmError::Timeout(120)),
            Ok(text("Here is how you could do it by hand.")),
        ]);
        let fx = fixture(deps(Some(model), None));
        let reply = fx
            .orchestrator
            .handle_task(TaskInput::new("Create and run a script that prints primes"))
            .await
            .unwrap();

        assert_eq!(reply.backend, OrchestratorBackend::PlainChat);
        assert_eq!(reply.message, "Here is how you could do it by hand.");
        let messages = chat(&fx).await;
        let notice = "The reasoning system encountered an error: step 2 (code_generation) failed";
        assert!(messages
            .iter()
            .any(|(role, m)| *role == ChatRole::System && m.starts_with(notice)));
    }

    #[tokio::test]
    async fn no_backend_is_internal_error() {
        let fx = fixture(deps(None, Some(FakeFramework::broken("no runtime"))));
        let err = fx
            .orchestrator
            .handle_task(TaskInput::new("Create and run a script"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("no runtime"));
        let messages = chat(&fx).await;
        assert!(messages.iter().filter(|(r, _)| *r == ChatRole::System).count() >= 1);
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let fx = fixture(deps(Some(ScriptedModel::new(vec![])), None));
        let err = fx.orchestrator.handle_task(TaskInput::new("  ")).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(chat(&fx).await.is_empty());
    }

    #[test]
    fn summary_truncates_long_responses() {
        let session = Uuid::new_v4();
        let mut step = ReasoningStep::pending(session, 1, StepType::Planning, "p", "m");
        step.response = "x".repeat(600);
        let summary = summarize(session, &[step]);
        assert!(summary.contains("**Step 1: Planning**\n"));
        let truncated = format!("{}...\n[Response truncated for readability]", "x".repeat(500));
        assert!(summary.contains(&truncated));
        assert!(!summary.contains(&"x".repeat(501)));
        assert!(summary.ends_with(&format!("Reasoning session: {session}\n")));
    }

    #[test]
    fn chat_history_starts_with_user_and_skips_system() {
        let messages = vec![
            ChatMessage::new("p", ChatRole::Assistant, "hello"),
            ChatMessage::new("p", ChatRole::System, "notice"),
            ChatMessage::new("p", ChatRole::User, "hi"),
            ChatMessage::new("p", ChatRole::Assistant, "how can I help"),
            ChatMessage::new("p", ChatRole::User, "explain"),
        ];
        let history = chat_history(&messages);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], Turn::User("hi".into()));
    }
}
