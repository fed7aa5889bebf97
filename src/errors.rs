use actix_web::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error — closed taxonomy for every control-plane operation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Infrastructure
    #[error("SSH transport to {host} unavailable: {reason}")]
    SshUnavailable { host: String, reason: String },

    #[error("command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    // State
    #[error("no slot registry for {project}/{environment}")]
    RegistryNotFound { project: String, environment: String },

    #[error("registry invariant violated: {reason}")]
    RegistryConflict { reason: String },

    // State machine
    #[error("slot operation rejected: {reason}")]
    SlotBusy { reason: String },

    #[error("no deployed slot available to promote")]
    NoDeployedCandidate,

    #[error("no slot in grace state to roll back to")]
    NoRollbackTarget,

    #[error("grace period has not expired (expires at {expires_at})")]
    GraceNotExpired { expires_at: DateTime<Utc> },

    // Runtime
    #[error("healthcheck on port {port} failed (last status: {last_status})")]
    HealthcheckFailed { port: u16, last_status: String },

    // Env store
    #[error("backup '{version}' not found for {project}/{environment}")]
    BackupNotFound {
        project: String,
        environment: String,
        version: String,
    },

    #[error("live env file already exists for {project}/{environment}")]
    EnvAlreadyExists { project: String, environment: String },

    // Validation
    #[error("{0}")]
    InvalidInput(String),

    // Catch-all; never used for a condition covered above
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable code surfaced in the API error payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SshUnavailable { .. } => "SSHUnavailable",
            Self::CommandTimeout { .. } => "CommandTimeout",
            Self::RegistryNotFound { .. } => "RegistryNotFound",
            Self::RegistryConflict { .. } => "RegistryConflict",
            Self::SlotBusy { .. } => "SlotBusy",
            Self::NoDeployedCandidate => "NoDeployedCandidate",
            Self::NoRollbackTarget => "NoRollbackTarget",
            Self::GraceNotExpired { .. } => "GraceNotExpired",
            Self::HealthcheckFailed { .. } => "HealthcheckFailed",
            Self::BackupNotFound { .. } => "BackupNotFound",
            Self::EnvAlreadyExists { .. } => "EnvAlreadyExists",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Internal(_) => "Internal",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::SshUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::CommandTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::RegistryNotFound { .. } | Self::BackupNotFound { .. } => StatusCode::NOT_FOUND,
            Self::RegistryConflict { .. }
            | Self::SlotBusy { .. }
            | Self::NoDeployedCandidate
            | Self::NoRollbackTarget
            | Self::GraceNotExpired { .. }
            | Self::EnvAlreadyExists { .. } => StatusCode::CONFLICT,
            Self::HealthcheckFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured detail payload, where one applies.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::SshUnavailable { host, reason } => {
                Some(json!({ "host": host, "reason": reason }))
            }
            Self::CommandTimeout { command, seconds } => {
                Some(json!({ "command": command, "timeoutSeconds": seconds }))
            }
            Self::GraceNotExpired { expires_at } => {
                Some(json!({ "graceExpiresAt": expires_at }))
            }
            Self::HealthcheckFailed { port, last_status } => {
                Some(json!({ "port": port, "lastStatus": last_status }))
            }
            Self::BackupNotFound { version, .. } => Some(json!({ "version": version })),
            _ => None,
        }
    }
}
