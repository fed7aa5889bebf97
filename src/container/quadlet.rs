//! Quadlet unit rendering
//!
//! One `.container` unit per slot, managed by the app host's user service
//! manager. The unit gives us restart-on-failure, boot persistence and a
//! journal log path; ad-hoc `podman run` is not a supported path.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{Environment, SlotName};

/// Everything the unit file needs to know about one slot deployment.
#[derive(Debug, Clone)]
pub struct UnitSpec<'a> {
    pub project: &'a str,
    pub environment: Environment,
    pub slot: SlotName,
    pub container_name: &'a str,
    pub image: &'a str,
    pub port: u16,
    pub version: &'a str,
    pub deployed_at: DateTime<Utc>,
    pub env_file: &'a str,
}

/// Render the `.container` unit. The `Image`, `PublishPort`,
/// `EnvironmentFile`, label and health-probe lines are contractual.
pub fn render_unit(spec: &UnitSpec<'_>) -> String {
    let mut unit = String::new();

    unit.push_str("[Unit]\n");
    unit.push_str(&format!(
        "Description={} {} {} slot\n",
        spec.project, spec.environment, spec.slot
    ));
    unit.push('\n');

    unit.push_str("[Container]\n");
    unit.push_str(&format!("Image={}\n", spec.image));
    unit.push_str(&format!("ContainerName={}\n", spec.container_name));
    unit.push_str(&format!("PublishPort={}:3000\n", spec.port));
    // leading '-' keeps the unit startable before the first env push
    unit.push_str(&format!("EnvironmentFile=-{}\n", spec.env_file));
    unit.push_str(&format!("Label=project={}\n", spec.project));
    unit.push_str(&format!("Label=environment={}\n", spec.environment));
    unit.push_str(&format!("Label=slot={}\n", spec.slot));
    unit.push_str(&format!("Label=version={}\n", spec.version));
    unit.push_str(&format!(
        "Label=deployed_at={}\n",
        spec.deployed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    unit.push_str("HealthCmd=curl -f http://localhost:3000/health\n");
    unit.push_str("HealthInterval=10s\n");
    unit.push_str("HealthTimeout=5s\n");
    unit.push_str("HealthRetries=3\n");
    unit.push('\n');

    unit.push_str("[Service]\n");
    unit.push_str("Restart=on-failure\n");
    unit.push_str("TimeoutStartSec=120\n");
    unit.push_str("TimeoutStopSec=10\n");
    unit.push('\n');

    unit.push_str("[Install]\n");
    unit.push_str("WantedBy=default.target\n");

    unit
}
