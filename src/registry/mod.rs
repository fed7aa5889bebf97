//! Slot registry store
//!
//! The sole persistence layer for slot state: one JSON document per
//! (project, environment) on the app host, replaced atomically via a
//! temp-file rename in the same directory.

pub mod ports;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::helpers::locks::{pair_key, KeyedLocks};
use crate::helpers::ssh::RemoteExecutor;
use crate::models::{Environment, HostMap, HostRole, SlotRegistry};

pub const SLOTS_DIR: &str = "/opt/codeb/registry/slots";

const MV_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SlotRegistryStore {
    executor: Arc<dyn RemoteExecutor>,
    hosts: HostMap,
    locks: KeyedLocks,
}

impl SlotRegistryStore {
    pub fn new(executor: Arc<dyn RemoteExecutor>, hosts: HostMap) -> Self {
        Self {
            executor,
            hosts,
            locks: KeyedLocks::new(),
        }
    }

    pub fn path(project: &str, environment: Environment) -> String {
        format!("{}/{}-{}.json", SLOTS_DIR, project, environment)
    }

    fn app_host(&self) -> &str {
        self.hosts.address(HostRole::App)
    }

    /// Returns `None` when the registry does not exist yet.
    pub async fn try_get(
        &self,
        project: &str,
        environment: Environment,
    ) -> Result<Option<SlotRegistry>> {
        let path = Self::path(project, environment);
        let content = self.executor.read_file(self.app_host(), &path).await?;
        match content {
            None => Ok(None),
            Some(raw) => {
                let registry = serde_json::from_str(&raw).map_err(|e| {
                    Error::RegistryConflict {
                        reason: format!("unparseable registry at {}: {}", path, e),
                    }
                })?;
                Ok(Some(registry))
            }
        }
    }

    pub async fn get(&self, project: &str, environment: Environment) -> Result<SlotRegistry> {
        self.try_get(project, environment)
            .await?
            .ok_or_else(|| Error::RegistryNotFound {
                project: project.to_string(),
                environment: environment.to_string(),
            })
    }

    /// All persisted registries, in directory order.
    pub async fn list(&self) -> Result<Vec<SlotRegistry>> {
        let entries = self.executor.list_dir(self.app_host(), SLOTS_DIR).await?;
        let mut registries = Vec::new();
        for entry in entries {
            if !entry.ends_with(".json") {
                continue;
            }
            let path = format!("{}/{}", SLOTS_DIR, entry);
            if let Some(raw) = self.executor.read_file(self.app_host(), &path).await? {
                match serde_json::from_str::<SlotRegistry>(&raw) {
                    Ok(registry) => registries.push(registry),
                    Err(e) => {
                        tracing::warn!("skipping unparseable registry {}: {}", path, e);
                    }
                }
            }
        }
        Ok(registries)
    }

    /// Create a brand-new registry; fails if one already exists.
    pub async fn create(&self, registry: SlotRegistry) -> Result<SlotRegistry> {
        let key = pair_key(&registry.project_name, registry.environment);
        let _guard = self.locks.lock(&key).await;

        if self
            .try_get(&registry.project_name, registry.environment)
            .await?
            .is_some()
        {
            return Err(Error::RegistryConflict {
                reason: format!("registry already exists for {}", key),
            });
        }

        let mut registry = registry;
        self.persist(&mut registry).await?;
        Ok(registry)
    }

    /// Atomically read, mutate, validate and write back one registry.
    /// Concurrent updates for the same key are serialized.
    pub async fn update<F>(
        &self,
        project: &str,
        environment: Environment,
        mutate: F,
    ) -> Result<SlotRegistry>
    where
        F: FnOnce(&mut SlotRegistry) -> Result<()> + Send,
    {
        let key = pair_key(project, environment);
        let _guard = self.locks.lock(&key).await;

        let mut registry = self.get(project, environment).await?;
        let ports_before = (registry.blue.port, registry.green.port);

        mutate(&mut registry)?;

        if (registry.blue.port, registry.green.port) != ports_before {
            return Err(Error::RegistryConflict {
                reason: "port pair is immutable once assigned".to_string(),
            });
        }

        self.persist(&mut registry).await?;
        Ok(registry)
    }

    async fn persist(&self, registry: &mut SlotRegistry) -> Result<()> {
        registry
            .validate()
            .map_err(|reason| Error::RegistryConflict { reason })?;

        // lastUpdated is monotonically non-decreasing per key
        let now = Utc::now();
        registry.last_updated = if now > registry.last_updated {
            now
        } else {
            registry.last_updated
        };

        let path = Self::path(&registry.project_name, registry.environment);
        let tmp = format!("{}.tmp.{}", path, Uuid::new_v4().simple());
        let json = serde_json::to_string_pretty(registry)
            .map_err(|e| Error::Internal(format!("serializing registry: {}", e)))?;

        // temp write + rename in the same directory so a crash never leaves
        // a torn registry file
        self.executor
            .write_file(self.app_host(), &tmp, &format!("{}\n", json))
            .await?;
        let mv = self
            .executor
            .exec(
                self.app_host(),
                &format!("mv \"{}\" \"{}\"", tmp, path),
                MV_TIMEOUT,
            )
            .await?;
        if !mv.success() {
            return Err(Error::Internal(format!(
                "renaming {} into place failed: {}",
                tmp,
                mv.stderr.trim()
            )));
        }
        Ok(())
    }
}
