//! Progress notifications: tool and step events fanned out per project group.
//!
//! Publishing is fire-and-forget from the chain's point of view: callers use
//! [`publish_best_effort`], which logs a failed publish and carries on.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::StepType;
use crate::tools::ToolResult;

/// Buffered events per group before slow listeners start lagging.
const GROUP_CAPACITY: usize = 256;

/// Group that listeners for a project subscribe to.
pub fn group_key(project_id: &str) -> String {
    format!("tools_{project_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

/// Step snapshot carried on a `reasoning_step` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNotice {
    pub id: Uuid,
    pub step_number: u32,
    pub step_type: StepType,
    pub status: StepStatus,
    pub model_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    ToolExecuted {
        tool_name: String,
        result: ToolResult,
    },
    ReasoningStep {
        session_id: Uuid,
        step: StepNotice,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification channel closed: {0}")]
    Closed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, group: &str, event: ProgressEvent) -> Result<(), NotifyError>;
}

/// Publish and swallow failures; a notification never fails the work it
/// describes.
pub async fn publish_best_effort(notifier: &dyn Notifier, group: &str, event: ProgressEvent) {
    if let Err(e) = notifier.publish(group, event).await {
        warn!(%group, error = %e, "notification dropped");
    }
}

/// In-process fan-out: one broadcast channel per group, any number of
/// listeners. Events published with no listener are discarded, and a group
/// whose listeners have all gone is dropped.
#[derive(Default)]
pub struct NotificationHub {
    groups: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, group: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut groups = self.groups.lock().await;
        groups.retain(|_, tx| tx.receiver_count() > 0);
        groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(GROUP_CAPACITY).0)
            .subscribe()
    }

    /// Listeners currently attached to a group.
    pub async fn listener_count(&self, group: &str) -> usize {
        let groups = self.groups.lock().await;
        groups.get(group).map_or(0, |tx| tx.receiver_count())
    }
}

#[async_trait]
impl Notifier for NotificationHub {
    async fn publish(&self, group: &str, event: ProgressEvent) -> Result<(), NotifyError> {
        let mut groups = self.groups.lock().await;
        match groups.get(group) {
            Some(tx) if tx.receiver_count() > 0 => {
                // Err only means the last listener left after the check.
                let delivered = tx.send(event).unwrap_or(0);
                debug!(%group, delivered, "notification published");
            }
            Some(_) => {
                groups.remove(group);
                debug!(%group, "dropped group with no listeners");
            }
            None => debug!(%group, "notification with no listeners"),
        }
        Ok(())
    }
}
