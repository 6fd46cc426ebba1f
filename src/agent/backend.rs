//! Orchestrator backends and the fallback selection between them.
//!
//! Selection walks a priority list and takes the first backend whose
//! dependencies initialize. Every skipped backend is reported with a typed
//! reason so the caller can record a visible notice for the transition.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::CompletionModel;
use crate::store::{RecordedToolCall, StepType};
use crate::tools::{Dispatcher, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorBackend {
    /// Step execution delegated to an external agent runtime.
    FrameworkBacked,
    /// Direct completion calls with an explicit tool-call loop.
    DirectApi,
    /// No reasoning chain; a single chat turn.
    PlainChat,
}

impl fmt::Display for OrchestratorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrchestratorBackend::FrameworkBacked => "framework_backed",
            OrchestratorBackend::DirectApi => "direct_api",
            OrchestratorBackend::PlainChat => "plain_chat",
        })
    }
}

/// One step handed to an agent framework.
pub struct FrameworkStep<'a> {
    pub step_type: StepType,
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub prompt: &'a str,
    /// Empty when the step is not allowed to use tools.
    pub tools: &'a [ToolDefinition],
    pub dispatcher: &'a Dispatcher,
}

#[derive(Debug, Clone, Default)]
pub struct FrameworkOutput {
    pub response: String,
    pub tool_calls: Vec<RecordedToolCall>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FrameworkError(pub String);

/// An external agent runtime that runs a whole step itself, calling tools
/// through the dispatcher it is given.
#[async_trait]
pub trait AgentFramework: Send + Sync {
    fn name(&self) -> &str;

    /// Readiness probe run once at backend selection.
    fn initialize(&self) -> Result<(), FrameworkError>;

    async fn run_step(&self, step: FrameworkStep<'_>) -> Result<FrameworkOutput, FrameworkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendInitError {
    #[error("no agent framework is configured")]
    FrameworkMissing,

    #[error("agent framework {name} failed to initialize: {reason}")]
    FrameworkInit { name: String, reason: String },

    #[error("no completion model is available")]
    ModelMissing,

    #[error("no orchestrator backend could be initialized")]
    Exhausted,
}

/// What a backend may be built from.
#[derive(Clone, Default)]
pub struct BackendDeps {
    pub framework: Option<Arc<dyn AgentFramework>>,
    pub model: Option<Arc<dyn CompletionModel>>,
}

/// A ready-to-use backend.
#[derive(Clone)]
pub enum Backend {
    Framework {
        framework: Arc<dyn AgentFramework>,
        model: Option<Arc<dyn CompletionModel>>,
    },
    DirectApi(Arc<dyn CompletionModel>),
    PlainChat(Arc<dyn CompletionModel>),
}

impl Backend {
    pub fn kind(&self) -> OrchestratorBackend {
        match self {
            Backend::Framework { .. } => OrchestratorBackend::FrameworkBacked,
            Backend::DirectApi(_) => OrchestratorBackend::DirectApi,
            Backend::PlainChat(_) => OrchestratorBackend::PlainChat,
        }
    }

    /// Model usable for a plain chat answer, if any.
    pub fn chat_model(&self) -> Option<Arc<dyn CompletionModel>> {
        match self {
            Backend::Framework { model, .. } => model.clone(),
            Backend::DirectApi(m) | Backend::PlainChat(m) => Some(m.clone()),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({})", self.kind())
    }
}

/// A backend that was tried and skipped.
#[derive(Debug)]
pub struct SkippedBackend {
    pub backend: OrchestratorBackend,
    pub reason: BackendInitError,
}

impl SkippedBackend {
    /// System notice for the transition away from this backend.
    pub fn notice(&self) -> String {
        match self.backend {
            OrchestratorBackend::FrameworkBacked => {
                "Using simplified reasoning system due to compatibility issues \
                 with the advanced system."
                    .to_string()
            }
            OrchestratorBackend::DirectApi => format!(
                "The reasoning system encountered an initialization error: {}. \
                 Falling back to regular chat.",
                self.reason
            ),
            OrchestratorBackend::PlainChat => {
                format!("Chat fallback unavailable: {}.", self.reason)
            }
        }
    }
}

#[derive(Debug)]
pub struct BackendSelection {
    pub backend: Backend,
    /// In priority order.
    pub skipped: Vec<SkippedBackend>,
}

fn init(kind: OrchestratorBackend, deps: &BackendDeps) -> Result<Backend, BackendInitError> {
    let model = || deps.model.clone().ok_or(BackendInitError::ModelMissing);
    match kind {
        OrchestratorBackend::FrameworkBacked => {
            let framework = deps
                .framework
                .clone()
                .ok_or(BackendInitError::FrameworkMissing)?;
            framework
                .initialize()
                .map_err(|e| BackendInitError::FrameworkInit {
                    name: framework.name().to_string(),
                    reason: e.0,
                })?;
            Ok(Backend::Framework {
                framework,
                model: deps.model.clone(),
            })
        }
        OrchestratorBackend::DirectApi => Ok(Backend::DirectApi(model()?)),
        OrchestratorBackend::PlainChat => Ok(Backend::PlainChat(model()?)),
    }
}

/// First backend in `priority` that initializes.
pub fn select_backend(
    priority: &[OrchestratorBackend],
    deps: &BackendDeps,
) -> Result<BackendSelection, BackendInitError> {
    let mut skipped = Vec::new();
    for &kind in priority {
        match init(kind, deps) {
            Ok(backend) => {
                info!(backend = %kind, skipped = skipped.len(), "orchestrator backend selected");
                return Ok(BackendSelection { backend, skipped });
            }
            Err(reason) => {
                warn!(backend = %kind, error = %reason, "orchestrator backend unavailable");
                skipped.push(SkippedBackend {
                    backend: kind,
                    reason,
                });
            }
        }
    }
    Err(BackendInitError::Exhausted)
}
