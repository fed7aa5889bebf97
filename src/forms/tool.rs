//! Tool-call request forms
//!
//! Input validation happens here, at the boundary: project names are DNS
//! labels, env keys are shell-safe identifiers, environments are the closed
//! enum. Everything past a validated form is trusted by the engine.

use serde::Deserialize;
use serde_json::Value;
use serde_valid::Validate;

use crate::models::Environment;

/// Envelope for `POST /tools`.
#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeployParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    #[validate(min_length = 1)]
    #[validate(max_length = 128)]
    pub version: String,
    pub image: Option<String>,
    #[serde(default)]
    pub skip_healthcheck: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PromoteParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RollbackParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    #[validate(max_length = 500)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatusParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Option<Environment>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SlotCleanupParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnvGetParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    #[validate(pattern = r"^[A-Za-z_][A-Za-z0-9_]*$")]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnvSetParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    #[validate(pattern = r"^[A-Za-z_][A-Za-z0-9_]*$")]
    pub key: String,
    #[validate(max_length = 4096)]
    pub value: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnvRestoreParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    /// `master`, `current`, or a backup timestamp.
    #[validate(min_length = 1)]
    pub version: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnvHistoryParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    #[validate(minimum = 1)]
    #[validate(maximum = 500)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnvGenerateParams {
    #[validate(pattern = r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")]
    pub project_name: String,
    pub environment: Environment,
    #[serde(default)]
    pub database: bool,
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub pubsub: bool,
}
