use serde::{Deserialize, Serialize};

use crate::configuration::HostSettings;

/// The four managed host roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    App,
    Streaming,
    Storage,
    Backup,
}

impl std::fmt::Display for HostRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::App => "app",
            Self::Streaming => "streaming",
            Self::Storage => "storage",
            Self::Backup => "backup",
        };
        write!(f, "{}", s)
    }
}

/// Static role → address mapping, loaded once at startup.
#[derive(Debug, Clone)]
pub struct HostMap {
    app: String,
    streaming: String,
    storage: String,
    backup: String,
}

impl HostMap {
    pub fn new(settings: &HostSettings) -> Self {
        Self {
            app: settings.app.clone(),
            streaming: settings.streaming.clone(),
            storage: settings.storage.clone(),
            backup: settings.backup.clone(),
        }
    }

    pub fn address(&self, role: HostRole) -> &str {
        match role {
            HostRole::App => &self.app,
            HostRole::Streaming => &self.streaming,
            HostRole::Storage => &self.storage,
            HostRole::Backup => &self.backup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_roles_to_addresses() {
        let map = HostMap::new(&HostSettings {
            app: "app.internal".into(),
            streaming: "stream.internal".into(),
            storage: "store.internal".into(),
            backup: "backup.internal".into(),
        });

        assert_eq!(map.address(HostRole::App), "app.internal");
        assert_eq!(map.address(HostRole::Backup), "backup.internal");
    }
}
