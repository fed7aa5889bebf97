//! Router controller
//!
//! Directs public traffic for a (project, environment) domain to exactly one
//! slot's port: renders the Caddy site file, writes it to the app host and
//! reloads the proxy. Reloads are serialized under a process-global lock;
//! Caddy drains existing connections on the old upstream, so the swap is
//! zero-downtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::errors::{Error, Result};
use crate::helpers::ssh::RemoteExecutor;
use crate::models::{public_domain, Environment, HostMap, HostRole};

pub const SITES_DIR: &str = "/etc/caddy/sites";

const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RouterController {
    executor: Arc<dyn RemoteExecutor>,
    hosts: HostMap,
    reload_lock: Mutex<()>,
}

impl RouterController {
    pub fn new(executor: Arc<dyn RemoteExecutor>, hosts: HostMap) -> Self {
        Self {
            executor,
            hosts,
            reload_lock: Mutex::new(()),
        }
    }

    pub fn site_path(project: &str, environment: Environment) -> String {
        format!("{}/{}-{}.caddy", SITES_DIR, project, environment)
    }

    /// Point the domain at `port` and reload the proxy.
    #[tracing::instrument(name = "Router configure.", skip(self))]
    pub async fn configure(
        &self,
        project: &str,
        environment: Environment,
        port: u16,
        is_rollback: bool,
    ) -> Result<()> {
        let domain = public_domain(project, environment);
        let site = render_site(project, environment, &domain, port, is_rollback);
        let app_host = self.hosts.address(HostRole::App);

        // one reload at a time; competing reloads can wedge the proxy
        let _guard = self.reload_lock.lock().await;

        self.executor
            .write_file(app_host, &Self::site_path(project, environment), &site)
            .await?;

        let output = self
            .executor
            .exec(app_host, "systemctl reload caddy", RELOAD_TIMEOUT)
            .await?;
        if !output.success() {
            return Err(Error::Internal(format!(
                "caddy reload failed: {}",
                output.stderr.trim()
            )));
        }

        tracing::info!("{} now routes to localhost:{}", domain, port);
        Ok(())
    }
}

/// Render the site block. The `reverse_proxy` and `header` blocks are
/// contractual; operators may append directives but must not touch those.
pub fn render_site(
    project: &str,
    environment: Environment,
    domain: &str,
    port: u16,
    is_rollback: bool,
) -> String {
    let mut site = String::new();

    site.push_str(&format!("{} {{\n", domain));
    site.push_str(&format!("    reverse_proxy localhost:{} {{\n", port));
    site.push_str("        health_uri /health\n");
    site.push_str("        health_interval 10s\n");
    site.push_str("        health_timeout 5s\n");
    site.push_str("    }\n");
    site.push_str("    encode gzip\n");
    site.push_str("    log {\n");
    site.push_str(&format!(
        "        output file /var/log/caddy/{}-{}.log\n",
        project, environment
    ));
    site.push_str("    }\n");
    site.push_str("    header {\n");
    site.push_str(&format!("        X-CodeB-Project \"{}\"\n", project));
    site.push_str(&format!("        X-CodeB-Environment \"{}\"\n", environment));
    if is_rollback {
        site.push_str("        X-CodeB-Rollback \"true\"\n");
    }
    site.push_str("    }\n");
    site.push_str("}\n");

    site
}
