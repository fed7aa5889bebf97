//! Container driver
//!
//! Turns slot intent into a running containerized service on the app host:
//! write the quadlet unit, reload the service manager, start the unit, poll
//! health over the slot's local port.

pub mod quadlet;

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::helpers::ssh::RemoteExecutor;
use crate::models::{HostMap, HostRole};

pub use quadlet::{render_unit, UnitSpec};

/// Quadlet search path of the app user's service manager.
pub const UNIT_DIR: &str = "$HOME/.config/containers/systemd";

const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const START_TIMEOUT: Duration = Duration::from_secs(150);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ContainerDriver {
    executor: Arc<dyn RemoteExecutor>,
    hosts: HostMap,
}

impl ContainerDriver {
    pub fn new(executor: Arc<dyn RemoteExecutor>, hosts: HostMap) -> Self {
        Self { executor, hosts }
    }

    fn app_host(&self) -> &str {
        self.hosts.address(HostRole::App)
    }

    pub fn unit_path(container_name: &str) -> String {
        format!("{}/{}.container", UNIT_DIR, container_name)
    }

    /// Write (or replace) the slot's unit file.
    pub async fn apply(&self, spec: &UnitSpec<'_>) -> Result<()> {
        let unit = render_unit(spec);
        self.executor
            .write_file(self.app_host(), &Self::unit_path(spec.container_name), &unit)
            .await
    }

    /// Rescan unit files after an `apply`.
    pub async fn reload(&self) -> Result<()> {
        let output = self
            .executor
            .exec(
                self.app_host(),
                "systemctl --user daemon-reload",
                RELOAD_TIMEOUT,
            )
            .await?;
        if !output.success() {
            return Err(Error::Internal(format!(
                "daemon-reload failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Stop any prior instance, then start fresh.
    pub async fn start(&self, container_name: &str) -> Result<()> {
        // prior instance may not exist; ignore the stop result
        let _ = self
            .executor
            .exec(
                self.app_host(),
                &format!("systemctl --user stop {}.service", container_name),
                STOP_TIMEOUT,
            )
            .await;

        let output = self
            .executor
            .exec(
                self.app_host(),
                &format!("systemctl --user start {}.service", container_name),
                START_TIMEOUT,
            )
            .await?;
        if !output.success() {
            return Err(Error::Internal(format!(
                "starting {} failed: {}",
                container_name,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    pub async fn stop(&self, container_name: &str) -> Result<()> {
        let output = self
            .executor
            .exec(
                self.app_host(),
                &format!("systemctl --user stop {}.service", container_name),
                STOP_TIMEOUT,
            )
            .await?;
        if !output.success() {
            tracing::warn!(
                "stopping {} reported: {}",
                container_name,
                output.stderr.trim()
            );
        }
        Ok(())
    }

    /// Remove the container and its unit file. `podman rm -f` is the
    /// recovery path for containers the unit no longer tracks.
    pub async fn remove(&self, container_name: &str) -> Result<()> {
        let _ = self
            .executor
            .exec(
                self.app_host(),
                &format!("podman rm -f {} 2>/dev/null", container_name),
                STOP_TIMEOUT,
            )
            .await;
        let _ = self
            .executor
            .exec(
                self.app_host(),
                &format!("rm -f \"{}\"", Self::unit_path(container_name)),
                STOP_TIMEOUT,
            )
            .await;
        Ok(())
    }

    /// One health probe; returns the observed HTTP status code as a string
    /// ("000" when the port does not answer).
    pub async fn probe(&self, port: u16) -> Result<String> {
        let output = self
            .executor
            .exec(
                self.app_host(),
                &format!(
                    "curl -s -o /dev/null -w '%{{http_code}}' --max-time 5 http://localhost:{}/health",
                    port
                ),
                PROBE_TIMEOUT,
            )
            .await?;
        let code = output.stdout.trim().to_string();
        if code.is_empty() {
            Ok("000".to_string())
        } else {
            Ok(code)
        }
    }

    /// Poll the slot's health endpoint until it answers 2xx or the deadline
    /// elapses. Surfaces the last observed code on failure.
    pub async fn wait_healthy(&self, port: u16, deadline: Duration) -> Result<String> {
        let started = tokio::time::Instant::now();

        loop {
            let status = self.probe(port).await?;
            if is_success(&status) {
                return Ok(status);
            }
            if started.elapsed() >= deadline {
                return Err(Error::HealthcheckFailed {
                    port,
                    last_status: status,
                });
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }
}

pub fn is_success(status: &str) -> bool {
    status
        .parse::<u16>()
        .map(|code| (200..300).contains(&code))
        .unwrap_or(false)
}
