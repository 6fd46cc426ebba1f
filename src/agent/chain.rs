//! The reasoning chain: planning, the selected middle steps, conclusion.
//!
//! Steps run strictly one after another. Each is persisted as pending,
//! announced, executed, then finalized as complete or failed. A failed
//! step stops the chain; the steps before it stay in the store.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::backend::{AgentFramework, FrameworkStep};
use super::classify::classify_needed_steps;
use super::prompts::{build_system_prompt, step_prompt, StepContext};
use super::tool_loop::{run_tool_loop, LoopContext, LoopLimits, LoopState};
use crate::config::{AgentConfig, LlmConfig};
use crate::error::ErrorKind;
use crate::llm::types::resolve_model;
use crate::llm::{CompletionModel, CompletionRequest, ToolChoice, Turn};
use crate::notify::{
    group_key, publish_best_effort, Notifier, ProgressEvent, StepNotice, StepStatus,
};
use crate::store::{
    RecordStore, RecordedToolCall, ReasoningSession, ReasoningStep, StepType, StoreError,
};
use crate::tools::{Dispatcher, ToolResult};

const TITLE_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("step {step_number} ({step_type}) failed: {message}")]
    StepFailed {
        step_number: u32,
        step_type: StepType,
        kind: ErrorKind,
        message: String,
    },

    #[error("record store: {0}")]
    Store(#[from] StoreError),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::StepFailed { kind, .. } => *kind,
            ChainError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// How steps reach a model.
#[derive(Clone)]
pub enum StepEngine {
    Framework(Arc<dyn AgentFramework>),
    Direct(Arc<dyn CompletionModel>),
}

/// What the user asked, plus editor context.
#[derive(Debug, Clone, Default)]
pub struct TaskInput {
    pub description: String,
    pub current_file: Option<String>,
    pub current_file_content: Option<String>,
}

impl TaskInput {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }
}

struct StepOutput {
    response: String,
    tool_calls: Vec<RecordedToolCall>,
}

struct StepFailure {
    kind: ErrorKind,
    message: String,
}

/// Drives one project's reasoning sessions.
pub struct ReasoningChain {
    project_id: String,
    engine: StepEngine,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    llm: LlmConfig,
    limits: LoopLimits,
}

impl ReasoningChain {
    pub fn new(
        project_id: impl Into<String>,
        engine: StepEngine,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            engine,
            dispatcher,
            store,
            notifier,
            llm: config.llm.clone(),
            limits: LoopLimits::from(&config.chain),
        }
    }

    /// Open a session titled after the task.
    pub async fn create_session(&self, task: &str) -> Result<ReasoningSession, ChainError> {
        let title = if task.chars().count() > TITLE_CHARS {
            let head: String = task.chars().take(TITLE_CHARS).collect();
            format!("{head}...")
        } else {
            task.to_string()
        };
        let session = self
            .store
            .create_session(&self.project_id, &title, task)
            .await?;
        info!(session = %session.id, project = %self.project_id, "reasoning session created");
        Ok(session)
    }

    /// Model identifier for a step: thinking steps get the reasoning model.
    pub fn model_for(&self, step_type: StepType) -> String {
        let alias = match step_type {
            StepType::Planning | StepType::Analysis | StepType::Conclusion => {
                &self.llm.reasoning_model
            }
            _ => &self.llm.tool_model,
        };
        resolve_model(alias).to_string()
    }

    /// Execute one step and persist its outcome.
    pub async fn execute_step(
        &self,
        session: &ReasoningSession,
        step_type: StepType,
        prompt: String,
    ) -> Result<ReasoningStep, ChainError> {
        let number = self.store.next_step_number(session.id).await?;
        let model = self.model_for(step_type);
        let mut step = ReasoningStep::pending(session.id, number, step_type, prompt, &model);
        self.store.create_step(&step).await?;

        info!(session = %session.id, step = number, %step_type, %model, "step started");
        self.announce(&step, StepStatus::Started).await;

        match self.invoke(step_type, &step.prompt, &model).await {
            Ok(output) => {
                step.response = output.response;
                step.tool_calls = output.tool_calls;
                step.is_complete = true;
                self.store.update_step(&step).await?;
                info!(
                    session = %session.id,
                    step = number,
                    tools = step.tool_calls.len(),
                    "step completed"
                );
                self.announce(&step, StepStatus::Completed).await;
                Ok(step)
            }
            Err(failure) => {
                step.error = Some(failure.message.clone());
                self.store.update_step(&step).await?;
                error!(
                    session = %session.id,
                    step = number,
                    error = %failure.message,
                    "step failed"
                );
                self.announce(&step, StepStatus::Failed).await;
                Err(ChainError::StepFailed {
                    step_number: number,
                    step_type,
                    kind: failure.kind,
                    message: failure.message,
                })
            }
        }
    }

    /// Run the whole chain inside `session`. On success the session is
    /// marked complete and the steps are returned in order.
    pub async fn run(
        &self,
        session: &mut ReasoningSession,
        task: &TaskInput,
    ) -> Result<Vec<ReasoningStep>, ChainError> {
        let base = StepContext {
            task: &task.description,
            current_file: task.current_file.as_deref(),
            current_file_content: task.current_file_content.as_deref(),
            ..StepContext::default()
        };

        let planning = self
            .execute_step(session, StepType::Planning, step_prompt(StepType::Planning, &base))
            .await?;
        let needed = classify_needed_steps(&task.description, &planning.response);
        info!(session = %session.id, steps = ?needed, "steps selected");

        let mut analysis: Option<String> = None;
        let mut implementation: Option<String> = None;
        let mut execution: Option<String> = None;
        let mut steps = vec![planning];

        for step_type in needed.into_iter().filter(|t| *t != StepType::Planning) {
            let ctx = StepContext {
                plan: Some(&steps[0].response),
                analysis: analysis.as_deref(),
                implementation: implementation.as_deref(),
                execution: execution.as_deref(),
                ..base.clone()
            };
            let prompt = step_prompt(step_type, &ctx);
            let step = self.execute_step(session, step_type, prompt).await?;

            let slot = match step_type {
                StepType::Analysis => Some(&mut analysis),
                StepType::CodeGeneration | StepType::Refinement => Some(&mut implementation),
                StepType::CodeExecution | StepType::Testing => Some(&mut execution),
                StepType::Planning | StepType::Conclusion => None,
            };
            if let Some(slot) = slot {
                *slot = Some(step.response.clone());
            }
            steps.push(step);
        }

        session.is_complete = true;
        self.store.update_session(session).await?;
        info!(session = %session.id, steps = steps.len(), "reasoning session complete");
        Ok(steps)
    }

    async fn invoke(
        &self,
        step_type: StepType,
        prompt: &str,
        model: &str,
    ) -> Result<StepOutput, StepFailure> {
        let tools = if step_type.uses_tools() {
            self.dispatcher.registry().definitions()
        } else {
            Vec::new()
        };
        let system = build_system_prompt(step_type, &tools);

        match &self.engine {
            StepEngine::Framework(framework) => {
                let output = framework
                    .run_step(FrameworkStep {
                        step_type,
                        model,
                        system_prompt: &system,
                        prompt,
                        tools: &tools,
                        dispatcher: &self.dispatcher,
                    })
                    .await
                    .map_err(|e| StepFailure {
                        kind: ErrorKind::ModelBackendUnavailable,
                        message: e.to_string(),
                    })?;
                self.report_framework_tools(&output.tool_calls).await;
                Ok(StepOutput {
                    response: output.response,
                    tool_calls: output.tool_calls,
                })
            }
            StepEngine::Direct(completion) => {
                let request = CompletionRequest {
                    model: model.to_string(),
                    system,
                    history: vec![Turn::User(prompt.to_string())],
                    tool_choice: if tools.is_empty() {
                        ToolChoice::None
                    } else {
                        ToolChoice::Auto
                    },
                    tools,
                    max_tokens: self.llm.max_tokens,
                    temperature: self.llm.temperature,
                };
                let group = group_key(&self.project_id);
                let ctx = LoopContext {
                    model: completion.as_ref(),
                    dispatcher: &self.dispatcher,
                    notifier: self.notifier.as_ref(),
                    group: &group,
                    limits: self.limits,
                };
                let outcome = run_tool_loop(&ctx, request).await.map_err(|e| StepFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                })?;
                if let LoopState::FollowUpFailed { round, error } = &outcome.state {
                    warn!(%step_type, round, %error, "step finished after failed follow-up");
                }
                Ok(StepOutput {
                    response: outcome.response,
                    tool_calls: outcome.tool_calls,
                })
            }
        }
    }

    /// The framework calls tools itself; mirror those calls as events.
    async fn report_framework_tools(&self, calls: &[RecordedToolCall]) {
        let group = group_key(&self.project_id);
        for call in calls {
            let Ok(result) = serde_json::from_value::<ToolResult>(call.result.clone()) else {
                continue;
            };
            publish_best_effort(
                self.notifier.as_ref(),
                &group,
                ProgressEvent::ToolExecuted {
                    tool_name: call.name.clone(),
                    result,
                },
            )
            .await;
        }
    }

    async fn announce(&self, step: &ReasoningStep, status: StepStatus) {
        let event = ProgressEvent::ReasoningStep {
            session_id: step.session_id,
            step: StepNotice {
                id: step.id,
                step_number: step.step_number,
                step_type: step.step_type,
                status,
                model_used: step.model_used.clone(),
                response: (status == StepStatus::Completed).then(|| step.response.clone()),
                error: step.error.clone(),
            },
        };
        publish_best_effort(self.notifier.as_ref(), &group_key(&self.project_id), event).await;
    }
}
