use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot registry — the source of truth for what runs where
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
    Preview,
}

impl Environment {
    /// Inclusive base-port range for this environment. Bases are allocated
    /// on even offsets so each (base, base+1) pair stays inside the range.
    pub fn port_range(&self) -> (u16, u16) {
        match self {
            Self::Staging => (3000, 3998),
            Self::Production => (4000, 4998),
            Self::Preview => (5000, 5998),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Preview => "preview",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            "preview" => Ok(Self::Preview),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotName {
    Blue,
    Green,
}

impl SlotName {
    pub fn other(&self) -> Self {
        match self {
            Self::Blue => Self::Green,
            Self::Green => Self::Blue,
        }
    }
}

impl std::fmt::Display for SlotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blue => write!(f, "blue"),
            Self::Green => write!(f, "green"),
        }
    }
}

/// `activeSlot` in the persisted document: blue, green, or "none" until the
/// first promote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveSlot {
    Blue,
    Green,
    None,
}

impl ActiveSlot {
    pub fn name(&self) -> Option<SlotName> {
        match self {
            Self::Blue => Some(SlotName::Blue),
            Self::Green => Some(SlotName::Green),
            Self::None => None,
        }
    }
}

impl From<SlotName> for ActiveSlot {
    fn from(name: SlotName) -> Self {
        match name {
            SlotName::Blue => Self::Blue,
            SlotName::Green => Self::Green,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Empty,
    Deploying,
    Deployed,
    Active,
    Grace,
    Draining,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Active => "active",
            Self::Grace => "grace",
            Self::Draining => "draining",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub name: SlotName,
    pub state: SlotState,
    /// Immutable once assigned; blue and green differ by exactly 1.
    pub port: u16,
    pub version: Option<String>,
    pub image: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub grace_expires_at: Option<DateTime<Utc>>,
    pub health_status: HealthStatus,
    pub container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Slot {
    pub fn empty(project: &str, environment: Environment, name: SlotName, port: u16) -> Self {
        Self {
            name,
            state: SlotState::Empty,
            port,
            version: None,
            image: None,
            deployed_at: None,
            grace_expires_at: None,
            health_status: HealthStatus::Unknown,
            container_name: format!("{}-{}-{}", project, environment, name),
            error: None,
        }
    }

    /// Reset to empty, keeping name/port/container identity.
    pub fn clear(&mut self) {
        self.state = SlotState::Empty;
        self.version = None;
        self.image = None;
        self.deployed_at = None;
        self.grace_expires_at = None;
        self.health_status = HealthStatus::Unknown;
        self.error = None;
    }
}

// Field order here is contractual: the persisted JSON keeps exactly this
// key order (projectName, environment, activeSlot, blue, green, lastUpdated).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRegistry {
    pub project_name: String,
    pub environment: Environment,
    pub active_slot: ActiveSlot,
    pub blue: Slot,
    pub green: Slot,
    pub last_updated: DateTime<Utc>,
}

impl SlotRegistry {
    /// Fresh registry: both slots empty, blue at `base`, green at `base + 1`,
    /// no active slot until the first promote.
    pub fn new(project: &str, environment: Environment, base_port: u16) -> Self {
        Self {
            project_name: project.to_string(),
            environment,
            active_slot: ActiveSlot::None,
            blue: Slot::empty(project, environment, SlotName::Blue, base_port),
            green: Slot::empty(project, environment, SlotName::Green, base_port + 1),
            last_updated: Utc::now(),
        }
    }

    pub fn slot(&self, name: SlotName) -> &Slot {
        match name {
            SlotName::Blue => &self.blue,
            SlotName::Green => &self.green,
        }
    }

    pub fn slot_mut(&mut self, name: SlotName) -> &mut Slot {
        match name {
            SlotName::Blue => &mut self.blue,
            SlotName::Green => &mut self.green,
        }
    }

    pub fn slots(&self) -> [&Slot; 2] {
        [&self.blue, &self.green]
    }

    /// Registry-level invariants, checked before every persist.
    pub fn validate(&self) -> Result<(), String> {
        let active_states = self
            .slots()
            .iter()
            .filter(|s| s.state == SlotState::Active)
            .count();
        if active_states > 1 {
            return Err("both slots are in state 'active'".to_string());
        }

        match self.active_slot.name() {
            Some(name) if self.slot(name).state != SlotState::Active => {
                return Err(format!(
                    "activeSlot is '{}' but its state is '{}'",
                    name,
                    self.slot(name).state
                ));
            }
            None if active_states != 0 => {
                return Err("a slot is 'active' but activeSlot is 'none'".to_string());
            }
            _ => {}
        }

        for slot in self.slots() {
            let in_grace = slot.state == SlotState::Grace;
            if in_grace != slot.grace_expires_at.is_some() {
                return Err(format!(
                    "slot '{}': graceExpiresAt must be set iff state is 'grace'",
                    slot.name
                ));
            }
        }

        if self.green.port != self.blue.port + 1 {
            return Err(format!(
                "port pair mismatch: blue={} green={}",
                self.blue.port, self.green.port
            ));
        }

        for slot in self.slots() {
            let placed = matches!(
                slot.state,
                SlotState::Deployed | SlotState::Active | SlotState::Grace | SlotState::Draining
            );
            if placed && (slot.version.is_none() || slot.image.is_none() || slot.deployed_at.is_none())
            {
                return Err(format!(
                    "slot '{}' is '{}' but version/image/deployedAt are incomplete",
                    slot.name, slot.state
                ));
            }
        }

        Ok(())
    }
}
