use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Environment, SlotName, SlotState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeployStart,
    DeployProgress,
    DeployComplete,
    DeployError,
    Promote,
    Rollback,
    HealthChange,
    SlotCleanup,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DeployStart => "deploy_start",
            Self::DeployProgress => "deploy_progress",
            Self::DeployComplete => "deploy_complete",
            Self::DeployError => "deploy_error",
            Self::Promote => "promote",
            Self::Rollback => "rollback",
            Self::HealthChange => "health_change",
            Self::SlotCleanup => "slot_cleanup",
        };
        write!(f, "{}", s)
    }
}

/// One domain event, published per (project, environment) channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub project: String,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SlotState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl SlotEvent {
    pub fn new(
        kind: EventKind,
        project: &str,
        environment: Environment,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            project: project.to_string(),
            environment,
            slot: None,
            state: None,
            version: None,
            message: message.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_slot(mut self, slot: SlotName) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_state(mut self, state: SlotState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
