use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Environment, SlotName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

/// One named sub-operation of a deploy; the ordered `steps` list is part of
/// the deploy contract so a caller can always tell how far a deploy got.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub slot: SlotName,
    pub port: u16,
    pub version: String,
    pub preview_url: String,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteResult {
    pub active_slot: SlotName,
    pub port: u16,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_slot: Option<SlotName>,
    /// True when the candidate was already active and nothing changed.
    pub already_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub active_slot: SlotName,
    pub port: u16,
    pub domain: String,
    pub from_slot: SlotName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    /// The slot that was cleaned, or none when there was nothing to do.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_slot: Option<SlotName>,
}

/// Audit line appended to the rollback log on the app host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackAudit {
    pub from_slot: SlotName,
    pub to_slot: SlotName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Domain for a (project, environment) pair: production drops the suffix.
pub fn public_domain(project: &str, environment: Environment) -> String {
    match environment {
        Environment::Production => format!("{}.codeb.dev", project),
        other => format!("{}-{}.codeb.dev", project, other),
    }
}

/// Per-slot URL published after a successful deploy.
pub fn preview_url(project: &str, slot: SlotName) -> String {
    format!("https://{}-{}.preview.codeb.dev", project, slot)
}
