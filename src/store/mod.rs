//! Record store: sessions, steps, projects and chat history.
//!
//! The chain only sees the [`RecordStore`] trait. [`MemoryStore`] keeps
//! everything in process, which is enough for the CLI and for tests.

pub mod records;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use records::{
    ChatMessage, ChatRole, Project, ReasoningSession, ReasoningStep, RecordedToolCall, StepType,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("session {session_id} already has step {step_number}")]
    DuplicateStep { session_id: Uuid, step_number: u32 },

    #[error("{entity} {id} is finalized and cannot be modified")]
    Finalized { entity: &'static str, id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_project(&self, project: Project) -> StoreResult<()>;

    async fn project(&self, id: &str) -> StoreResult<Project>;

    async fn create_session(
        &self,
        project_id: &str,
        title: &str,
        description: &str,
    ) -> StoreResult<ReasoningSession>;

    async fn session(&self, id: Uuid) -> StoreResult<ReasoningSession>;

    /// Rejects any change to a session already marked complete.
    async fn update_session(&self, session: &ReasoningSession) -> StoreResult<()>;

    /// Rejects a step number already used in the session.
    async fn create_step(&self, step: &ReasoningStep) -> StoreResult<()>;

    /// Rejects any change to a step that is complete or failed.
    async fn update_step(&self, step: &ReasoningStep) -> StoreResult<()>;

    /// Steps of a session, ascending by step number.
    async fn steps_for(&self, session_id: Uuid) -> StoreResult<Vec<ReasoningStep>>;

    /// Highest step number + 1, or 1 for an empty session.
    async fn next_step_number(&self, session_id: Uuid) -> StoreResult<u32>;

    async fn append_chat_message(&self, message: ChatMessage) -> StoreResult<()>;

    async fn chat_messages(&self, project_id: &str) -> StoreResult<Vec<ChatMessage>>;
}

#[derive(Default)]
struct Tables {
    projects: HashMap<String, Project>,
    sessions: HashMap<Uuid, ReasoningSession>,
    steps: HashMap<Uuid, ReasoningStep>,
    chat: Vec<ChatMessage>,
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_project(&self, project: Project) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        t.projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn project(&self, id: &str) -> StoreResult<Project> {
        let t = self.tables.read().await;
        t.projects.get(id).cloned().ok_or_else(|| StoreError::NotFound {
            entity: "project",
            id: id.to_string(),
        })
    }

    async fn create_session(
        &self,
        project_id: &str,
        title: &str,
        description: &str,
    ) -> StoreResult<ReasoningSession> {
        let session = ReasoningSession {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            is_complete: false,
        };
        let mut t = self.tables.write().await;
        t.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn session(&self, id: Uuid) -> StoreResult<ReasoningSession> {
        let t = self.tables.read().await;
        t.sessions.get(&id).cloned().ok_or_else(|| StoreError::NotFound {
            entity: "session",
            id: id.to_string(),
        })
    }

    async fn update_session(&self, session: &ReasoningSession) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let stored = t
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session.id.to_string(),
            })?;
        if stored.is_complete {
            return Err(StoreError::Finalized {
                entity: "session",
                id: session.id.to_string(),
            });
        }
        *stored = session.clone();
        Ok(())
    }

    async fn create_step(&self, step: &ReasoningStep) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if !t.sessions.contains_key(&step.session_id) {
            return Err(StoreError::NotFound {
                entity: "session",
                id: step.session_id.to_string(),
            });
        }
        let taken = t
            .steps
            .values()
            .any(|s| s.session_id == step.session_id && s.step_number == step.step_number);
        if taken {
            return Err(StoreError::DuplicateStep {
                session_id: step.session_id,
                step_number: step.step_number,
            });
        }
        t.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &ReasoningStep) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let stored = t.steps.get_mut(&step.id).ok_or_else(|| StoreError::NotFound {
            entity: "step",
            id: step.id.to_string(),
        })?;
        if stored.is_final() {
            return Err(StoreError::Finalized {
                entity: "step",
                id: step.id.to_string(),
            });
        }
        *stored = step.clone();
        Ok(())
    }

    async fn steps_for(&self, session_id: Uuid) -> StoreResult<Vec<ReasoningStep>> {
        let t = self.tables.read().await;
        let mut steps: Vec<ReasoningStep> = t
            .steps
            .values()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_number);
        Ok(steps)
    }

    async fn next_step_number(&self, session_id: Uuid) -> StoreResult<u32> {
        let t = self.tables.read().await;
        let max = t
            .steps
            .values()
            .filter(|s| s.session_id == session_id)
            .map(|s| s.step_number)
            .max();
        Ok(max.map_or(1, |n| n + 1))
    }

    async fn append_chat_message(&self, message: ChatMessage) -> StoreResult<()> {
        self.tables.write().await.chat.push(message);
        Ok(())
    }

    async fn chat_messages(&self, project_id: &str) -> StoreResult<Vec<ChatMessage>> {
        let t = self.tables.read().await;
        Ok(t.chat
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }
}
