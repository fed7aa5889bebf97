//! Slot engine
//!
//! Owns the deploy / promote / rollback / cleanup state machine. Operations
//! on the same (project, environment) key are serialized by a keyed lock
//! table; a deploy that cannot take the lock immediately fails with
//! `SlotBusy` and leaves no side effects.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as GraceDuration, Utc};
use serde_json::json;

use crate::container::{is_success, ContainerDriver, UnitSpec};
use crate::envstore::EnvStore;
use crate::errors::{Error, Result};
use crate::events::EventBus;
use crate::helpers::locks::{pair_key, KeyedLocks};
use crate::helpers::ssh::RemoteExecutor;
use crate::models::{
    preview_url, public_domain, CleanupResult, DeployResult, Environment, EventKind, HealthStatus,
    HostMap, HostRole, PromoteResult, RollbackAudit, RollbackResult, Slot, SlotEvent, SlotName,
    SlotRegistry, SlotState, StepRecord, StepStatus,
};
use crate::registry::ports::PortAllocator;
use crate::registry::SlotRegistryStore;
use crate::router::RouterController;

pub const ROLLBACK_LOG_DIR: &str = "/opt/codeb/logs/rollbacks";

pub struct SlotEngine {
    executor: Arc<dyn RemoteExecutor>,
    hosts: HostMap,
    registry: Arc<SlotRegistryStore>,
    ports: PortAllocator,
    driver: ContainerDriver,
    router: RouterController,
    events: EventBus,
    locks: KeyedLocks,
    grace_period: GraceDuration,
    health_timeout: Duration,
}

impl SlotEngine {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        hosts: HostMap,
        registry: Arc<SlotRegistryStore>,
        events: EventBus,
        grace_period_hours: i64,
        health_timeout_secs: u64,
    ) -> Self {
        Self {
            driver: ContainerDriver::new(executor.clone(), hosts.clone()),
            router: RouterController::new(executor.clone(), hosts.clone()),
            executor,
            hosts,
            registry,
            ports: PortAllocator::new(),
            events,
            locks: KeyedLocks::new(),
            grace_period: GraceDuration::hours(grace_period_hours),
            health_timeout: Duration::from_secs(health_timeout_secs),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // deploy
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[tracing::instrument(name = "Deploy.", skip(self))]
    pub async fn deploy(
        &self,
        project: &str,
        environment: Environment,
        version: &str,
        image: Option<String>,
        skip_healthcheck: bool,
    ) -> Result<DeployResult> {
        let key = pair_key(project, environment);
        let _guard = self.locks.try_lock(&key).map_err(|_| Error::SlotBusy {
            reason: format!("another operation is in progress for {}", key),
        })?;

        let started = Instant::now();
        let mut steps = Steps::new();

        let registry = steps
            .run("load_registry", self.registry.try_get(project, environment))
            .await?;
        let registry = match registry {
            Some(registry) => {
                steps.skip("allocate_ports");
                registry
            }
            None => {
                steps
                    .run("allocate_ports", self.init_registry(project, environment))
                    .await?
            }
        };

        // target is the slot that is not active; first-ever deploy goes blue
        let target_name = registry
            .active_slot
            .name()
            .map(|name| name.other())
            .unwrap_or(SlotName::Blue);
        let target = registry.slot(target_name);
        if matches!(target.state, SlotState::Deploying | SlotState::Active) {
            return Err(Error::SlotBusy {
                reason: format!("slot {} is {}", target_name, target.state),
            });
        }

        let port = target.port;
        let container_name = target.container_name.clone();
        let image = image.unwrap_or_else(|| format!("localhost/{}:{}", project, version));

        self.registry
            .update(project, environment, |reg| {
                let slot = reg.slot_mut(target_name);
                slot.state = SlotState::Deploying;
                slot.grace_expires_at = None;
                slot.error = None;
                Ok(())
            })
            .await?;

        self.events.publish(
            SlotEvent::new(
                EventKind::DeployStart,
                project,
                environment,
                format!("deploying {} to slot {}", version, target_name),
            )
            .with_slot(target_name)
            .with_state(SlotState::Deploying)
            .with_version(version),
        );

        let deployed_at = Utc::now();
        let env_file = EnvStore::live_path(project, environment);
        let health = if skip_healthcheck {
            HealthStatus::Unknown
        } else {
            HealthStatus::Healthy
        };

        let outcome: Result<()> = {
            let steps = &mut steps;
            let driver = &self.driver;
            async {
                let spec = UnitSpec {
                    project,
                    environment,
                    slot: target_name,
                    container_name: &container_name,
                    image: &image,
                    port,
                    version,
                    deployed_at,
                    env_file: &env_file,
                };
                steps.run("write_unit", driver.apply(&spec)).await?;
                steps.run("daemon_reload", driver.reload()).await?;
                steps
                    .run("start_container", driver.start(&container_name))
                    .await?;
                if skip_healthcheck {
                    steps.skip("health_check");
                } else {
                    steps
                        .run(
                            "health_check",
                            async {
                                driver.wait_healthy(port, self.health_timeout).await?;
                                Ok(())
                            },
                        )
                        .await?;
                }
                steps
                    .run(
                        "persist_registry",
                        self.registry.update(project, environment, |reg| {
                            let slot = reg.slot_mut(target_name);
                            slot.state = SlotState::Deployed;
                            slot.version = Some(version.to_string());
                            slot.image = Some(image.clone());
                            slot.deployed_at = Some(deployed_at);
                            slot.health_status = health;
                            slot.error = None;
                            Ok(())
                        }),
                    )
                    .await?;
                Ok(())
            }
            .await
        };

        if let Err(err) = outcome {
            self.recover_failed_deploy(project, environment, target_name, &container_name, &err)
                .await;
            self.events.publish(
                SlotEvent::new(EventKind::DeployError, project, environment, err.to_string())
                    .with_slot(target_name)
                    .with_version(version)
                    .with_metadata(json!({ "lastStep": steps.last_name() })),
            );
            return Err(err);
        }

        let preview = preview_url(project, target_name);
        self.events.publish(
            SlotEvent::new(
                EventKind::DeployComplete,
                project,
                environment,
                format!("{} deployed to slot {}", version, target_name),
            )
            .with_slot(target_name)
            .with_state(SlotState::Deployed)
            .with_version(version)
            .with_metadata(json!({ "previewUrl": preview, "port": port })),
        );

        Ok(DeployResult {
            slot: target_name,
            port,
            version: version.to_string(),
            preview_url: preview,
            duration_ms: started.elapsed().as_millis() as u64,
            steps: steps.into_inner(),
        })
    }

    async fn init_registry(
        &self,
        project: &str,
        environment: Environment,
    ) -> Result<SlotRegistry> {
        let existing = self.registry.list().await?;
        let base = self.ports.allocate(environment, &existing).await?;
        self.registry
            .create(SlotRegistry::new(project, environment, base))
            .await
    }

    /// A failed or cancelled deploy must not leave a half-started slot: stop
    /// and remove the container, then reset the slot to empty with the error
    /// recorded. If the reset itself fails the registry stays `deploying`
    /// and `cleanup --force` is the documented recovery.
    async fn recover_failed_deploy(
        &self,
        project: &str,
        environment: Environment,
        slot: SlotName,
        container_name: &str,
        err: &Error,
    ) {
        if let Err(stop_err) = self.driver.stop(container_name).await {
            tracing::warn!("stop of {} during recovery failed: {}", container_name, stop_err);
        }
        if let Err(remove_err) = self.driver.remove(container_name).await {
            tracing::warn!(
                "remove of {} during recovery failed: {}",
                container_name,
                remove_err
            );
        }

        let message = err.to_string();
        let reset = self
            .registry
            .update(project, environment, move |reg| {
                let target = reg.slot_mut(slot);
                target.clear();
                target.error = Some(message);
                Ok(())
            })
            .await;
        if let Err(reset_err) = reset {
            tracing::error!(
                "slot {} stuck in 'deploying' after failed deploy ({}); recover with cleanup force",
                slot,
                reset_err
            );
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // promote
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[tracing::instrument(name = "Promote.", skip(self))]
    pub async fn promote(&self, project: &str, environment: Environment) -> Result<PromoteResult> {
        let key = pair_key(project, environment);
        let _guard = self.locks.lock(&key).await;

        let registry = self.registry.get(project, environment).await?;
        let active_name = registry.active_slot.name();
        let domain = public_domain(project, environment);

        // candidate: the non-active deployed slot; when both qualify
        // (transient after rollback) the most recently deployed one wins
        let candidate = registry
            .slots()
            .into_iter()
            .filter(|s| Some(s.name) != active_name && s.state == SlotState::Deployed)
            .max_by_key(|s| s.deployed_at)
            .cloned();

        let candidate = match candidate {
            Some(candidate) => candidate,
            // retry after a completed promote is a no-op success
            None => {
                return match active_name {
                    Some(name) => Ok(PromoteResult {
                        active_slot: name,
                        port: registry.slot(name).port,
                        domain,
                        previous_slot: None,
                        already_active: true,
                    }),
                    None => Err(Error::NoDeployedCandidate),
                };
            }
        };

        let status = self.driver.probe(candidate.port).await?;
        self.note_probe(project, environment, &candidate, &status);
        if !is_success(&status) {
            return Err(Error::HealthcheckFailed {
                port: candidate.port,
                last_status: status,
            });
        }

        self.router
            .configure(project, environment, candidate.port, false)
            .await?;

        let grace_period = self.grace_period;
        self.registry
            .update(project, environment, move |reg| {
                if let Some(prev) = active_name {
                    let slot = reg.slot_mut(prev);
                    slot.state = SlotState::Grace;
                    slot.grace_expires_at = Some(Utc::now() + grace_period);
                }
                let slot = reg.slot_mut(candidate.name);
                slot.state = SlotState::Active;
                slot.grace_expires_at = None;
                slot.health_status = HealthStatus::Healthy;
                reg.active_slot = candidate.name.into();
                Ok(())
            })
            .await?;

        self.events.publish(
            SlotEvent::new(
                EventKind::Promote,
                project,
                environment,
                format!("slot {} promoted on {}", candidate.name, domain),
            )
            .with_slot(candidate.name)
            .with_state(SlotState::Active)
            .with_version(candidate.version.as_deref().unwrap_or(""))
            .with_metadata(json!({ "domain": domain, "port": candidate.port })),
        );

        Ok(PromoteResult {
            active_slot: candidate.name,
            port: candidate.port,
            domain,
            previous_slot: active_name,
            already_active: false,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // rollback
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[tracing::instrument(name = "Rollback.", skip(self))]
    pub async fn rollback(
        &self,
        project: &str,
        environment: Environment,
        reason: Option<String>,
    ) -> Result<RollbackResult> {
        let key = pair_key(project, environment);
        let _guard = self.locks.lock(&key).await;

        let registry = self.registry.get(project, environment).await?;
        let target = registry
            .slots()
            .into_iter()
            .find(|s| s.state == SlotState::Grace)
            .cloned()
            .ok_or(Error::NoRollbackTarget)?;

        let status = self.driver.probe(target.port).await?;
        self.note_probe(project, environment, &target, &status);
        if !is_success(&status) {
            return Err(Error::HealthcheckFailed {
                port: target.port,
                last_status: status,
            });
        }

        self.router
            .configure(project, environment, target.port, true)
            .await?;

        let unseated = registry.active_slot.name();
        let from_version = unseated.and_then(|name| registry.slot(name).version.clone());

        self.registry
            .update(project, environment, move |reg| {
                if let Some(prev) = unseated {
                    // the just-unseated slot loses its grace protection
                    let slot = reg.slot_mut(prev);
                    slot.state = SlotState::Deployed;
                    slot.grace_expires_at = None;
                }
                let slot = reg.slot_mut(target.name);
                slot.state = SlotState::Active;
                slot.grace_expires_at = None;
                slot.health_status = HealthStatus::Healthy;
                reg.active_slot = target.name.into();
                Ok(())
            })
            .await?;

        let audit = RollbackAudit {
            from_slot: unseated.unwrap_or_else(|| target.name.other()),
            to_slot: target.name,
            from_version: from_version.clone(),
            to_version: target.version.clone(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        };
        let line = serde_json::to_string(&audit)
            .map_err(|e| Error::Internal(format!("serializing rollback audit: {}", e)))?;
        let log_path = format!("{}/{}-{}.log", ROLLBACK_LOG_DIR, project, environment);
        self.executor
            .append_file(self.hosts.address(HostRole::App), &log_path, &line)
            .await?;

        let domain = public_domain(project, environment);
        self.events.publish(
            SlotEvent::new(
                EventKind::Rollback,
                project,
                environment,
                format!(
                    "rolled back to slot {}{}",
                    target.name,
                    reason
                        .as_deref()
                        .map(|r| format!(": {}", r))
                        .unwrap_or_default()
                ),
            )
            .with_slot(target.name)
            .with_state(SlotState::Active)
            .with_version(target.version.as_deref().unwrap_or(""))
            .with_metadata(json!({
                "fromVersion": from_version,
                "toVersion": target.version,
                "reason": reason,
            })),
        );

        Ok(RollbackResult {
            active_slot: target.name,
            port: target.port,
            domain,
            from_slot: audit.from_slot,
            from_version,
            to_version: target.version.clone(),
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // cleanup
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[tracing::instrument(name = "Cleanup.", skip(self))]
    pub async fn cleanup(
        &self,
        project: &str,
        environment: Environment,
        force: bool,
    ) -> Result<CleanupResult> {
        let key = pair_key(project, environment);
        let _guard = self.locks.lock(&key).await;

        let registry = self.registry.get(project, environment).await?;
        let grace_slot = registry
            .slots()
            .into_iter()
            .find(|s| s.state == SlotState::Grace)
            .cloned();

        let target = match grace_slot {
            Some(slot) => slot,
            None => {
                // with force, also recover a slot stuck in 'deploying'
                let stuck = force
                    .then(|| {
                        registry
                            .slots()
                            .into_iter()
                            .find(|s| s.state == SlotState::Deploying)
                            .cloned()
                    })
                    .flatten();
                match stuck {
                    Some(slot) => slot,
                    None => return Ok(CleanupResult { cleaned_slot: None }),
                }
            }
        };

        if let Some(expires_at) = target.grace_expires_at {
            if Utc::now() < expires_at && !force {
                return Err(Error::GraceNotExpired { expires_at });
            }
        }

        self.driver.stop(&target.container_name).await?;
        self.driver.remove(&target.container_name).await?;

        self.registry
            .update(project, environment, move |reg| {
                reg.slot_mut(target.name).clear();
                Ok(())
            })
            .await?;

        self.events.publish(
            SlotEvent::new(
                EventKind::SlotCleanup,
                project,
                environment,
                format!("slot {} cleaned up", target.name),
            )
            .with_slot(target.name)
            .with_state(SlotState::Empty),
        );

        Ok(CleanupResult {
            cleaned_slot: Some(target.name),
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // read side
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn status(
        &self,
        project: &str,
        environment: Option<Environment>,
    ) -> Result<Vec<SlotRegistry>> {
        match environment {
            Some(environment) => Ok(vec![self.registry.get(project, environment).await?]),
            None => Ok(self
                .registry
                .list()
                .await?
                .into_iter()
                .filter(|r| r.project_name == project)
                .collect()),
        }
    }

    pub async fn list(&self) -> Result<Vec<SlotRegistry>> {
        self.registry.list().await
    }

    /// Surface a probe result as a health_change event when it disagrees
    /// with the recorded status. Rejected operations never mutate the
    /// registry, so the event is the only trace.
    fn note_probe(&self, project: &str, environment: Environment, slot: &Slot, status: &str) {
        let observed = if is_success(status) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        if observed != slot.health_status {
            self.events.publish(
                SlotEvent::new(
                    EventKind::HealthChange,
                    project,
                    environment,
                    format!("slot {} probe returned {}", slot.name, status),
                )
                .with_slot(slot.name)
                .with_metadata(json!({ "healthStatus": observed, "httpStatus": status })),
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Steps — ordered sub-operation ledger for deploy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Steps {
    list: Vec<StepRecord>,
}

impl Steps {
    fn new() -> Self {
        Self { list: Vec::new() }
    }

    async fn run<T, F>(&mut self, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.list.push(StepRecord {
            name: name.to_string(),
            status: if result.is_ok() {
                StepStatus::Ok
            } else {
                StepStatus::Failed
            },
            duration_ms: started.elapsed().as_millis() as u64,
        });
        result
    }

    fn skip(&mut self, name: &str) {
        self.list.push(StepRecord {
            name: name.to_string(),
            status: StepStatus::Skipped,
            duration_ms: 0,
        });
    }

    fn last_name(&self) -> Option<&str> {
        self.list.last().map(|s| s.name.as_str())
    }

    fn into_inner(self) -> Vec<StepRecord> {
        self.list
    }
}
