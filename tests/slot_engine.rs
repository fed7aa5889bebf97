//! End-to-end slot engine scenarios against the in-memory host fake.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as GraceDuration, Utc};

use codeb::errors::Error;
use codeb::models::{
    ActiveSlot, Environment, HealthStatus, SlotName, SlotRegistry, SlotState, StepStatus,
};

use common::{spawn_state, FakeExecutor, APP_HOST};

const REGISTRY_PATH: &str = "/opt/codeb/registry/slots/acme-production.json";
const UNIT_DIR: &str = "$HOME/.config/containers/systemd";

fn registry_on(fake: &FakeExecutor) -> SlotRegistry {
    let raw = fake
        .file(APP_HOST, REGISTRY_PATH)
        .expect("registry file missing");
    serde_json::from_str(&raw).expect("registry file unparseable")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1: first deploy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn first_deploy_targets_blue_on_the_environment_base_port() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    let result = state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .expect("first deploy should succeed");

    assert_eq!(result.slot, SlotName::Blue);
    assert_eq!(result.port, 4000);
    assert_eq!(result.preview_url, "https://acme-blue.preview.codeb.dev");

    let registry = registry_on(&fake);
    assert_eq!(registry.active_slot, ActiveSlot::None);
    assert_eq!(registry.blue.state, SlotState::Deployed);
    assert_eq!(registry.blue.port, 4000);
    assert_eq!(registry.green.port, 4001);
    assert_eq!(registry.blue.version.as_deref(), Some("v1"));
    assert_eq!(
        registry.blue.image.as_deref(),
        Some("localhost/acme:v1"),
        "image defaults to the local project reference"
    );
    assert_eq!(registry.blue.health_status, HealthStatus::Healthy);

    // unit file on disk, daemon reloaded, container started
    let unit = fake
        .file(APP_HOST, &format!("{}/acme-production-blue.container", UNIT_DIR))
        .expect("unit file missing");
    assert!(unit.contains("PublishPort=4000:3000"));
    assert!(!fake.commands_matching("daemon-reload").is_empty());
    assert!(!fake
        .commands_matching("systemctl --user start acme-production-blue.service")
        .is_empty());

    // steps ledger covers the full flow in order
    let names: Vec<&str> = result.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "load_registry",
            "allocate_ports",
            "write_unit",
            "daemon_reload",
            "start_container",
            "health_check",
            "persist_registry"
        ]
    );
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Ok));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2: promote
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn promote_routes_the_domain_to_the_deployed_slot() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .unwrap();
    let result = state
        .engine
        .promote("acme", Environment::Production)
        .await
        .expect("promote should succeed");

    assert_eq!(result.active_slot, SlotName::Blue);
    assert_eq!(result.domain, "acme.codeb.dev");
    assert!(!result.already_active);

    let site = fake
        .file(APP_HOST, "/etc/caddy/sites/acme-production.caddy")
        .expect("caddy site missing");
    assert!(site.contains("reverse_proxy localhost:4000"));
    assert!(!fake.commands_matching("systemctl reload caddy").is_empty());

    let registry = registry_on(&fake);
    assert_eq!(registry.active_slot, ActiveSlot::Blue);
    assert_eq!(registry.blue.state, SlotState::Active);
    assert_eq!(registry.green.state, SlotState::Empty);
}

#[tokio::test]
async fn promote_without_a_candidate_is_rejected_or_idempotent() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .unwrap();
    state
        .engine
        .promote("acme", Environment::Production)
        .await
        .unwrap();

    // retry after a completed promote: no-op success
    let retry = state
        .engine
        .promote("acme", Environment::Production)
        .await
        .expect("promote retry should be a no-op success");
    assert!(retry.already_active);
    assert_eq!(retry.active_slot, SlotName::Blue);

    // a project that never deployed has no registry at all
    let err = state
        .engine
        .promote("globex", Environment::Production)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RegistryNotFound { .. }));
}

#[tokio::test]
async fn promote_with_nothing_deployed_reports_no_candidate() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    // failed deploy leaves both slots empty and no active slot
    fake.set_health(4000, "000");
    let _ = state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await;

    let err = state
        .engine
        .promote("acme", Environment::Production)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoDeployedCandidate));
}

#[tokio::test]
async fn promote_rejects_an_unhealthy_candidate_without_mutating_state() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .unwrap();

    fake.set_health(4000, "503");
    let err = state
        .engine
        .promote("acme", Environment::Production)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HealthcheckFailed { port: 4000, .. }));

    let registry = registry_on(&fake);
    assert_eq!(registry.active_slot, ActiveSlot::None);
    assert_eq!(registry.blue.state, SlotState::Deployed);
    assert!(
        fake.file(APP_HOST, "/etc/caddy/sites/acme-production.caddy")
            .is_none(),
        "rejected promote must not touch the proxy"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3: second deploy, promote, rollback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn rollback_restores_the_grace_slot_and_appends_an_audit_line() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .unwrap();
    state
        .engine
        .promote("acme", Environment::Production)
        .await
        .unwrap();

    // second deploy alternates to green
    let second = state
        .engine
        .deploy("acme", Environment::Production, "v2", None, false)
        .await
        .unwrap();
    assert_eq!(second.slot, SlotName::Green);
    assert_eq!(second.port, 4001);

    state
        .engine
        .promote("acme", Environment::Production)
        .await
        .unwrap();

    let registry = registry_on(&fake);
    assert_eq!(registry.active_slot, ActiveSlot::Green);
    assert_eq!(registry.blue.state, SlotState::Grace);
    let expires = registry.blue.grace_expires_at.expect("grace deadline set");
    let window = expires - Utc::now();
    assert!(window > GraceDuration::hours(47) && window <= GraceDuration::hours(48));

    let result = state
        .engine
        .rollback("acme", Environment::Production, Some("bug in v2".into()))
        .await
        .expect("rollback should succeed");

    assert_eq!(result.active_slot, SlotName::Blue);
    assert_eq!(result.port, 4000);
    assert_eq!(result.from_version.as_deref(), Some("v2"));
    assert_eq!(result.to_version.as_deref(), Some("v1"));

    let registry = registry_on(&fake);
    assert_eq!(registry.active_slot, ActiveSlot::Blue);
    assert_eq!(registry.blue.state, SlotState::Active);
    assert!(registry.blue.grace_expires_at.is_none());
    // the unseated slot loses grace protection but stays promotable
    assert_eq!(registry.green.state, SlotState::Deployed);
    assert!(registry.green.grace_expires_at.is_none());

    let site = fake
        .file(APP_HOST, "/etc/caddy/sites/acme-production.caddy")
        .unwrap();
    assert!(site.contains("reverse_proxy localhost:4000"));
    assert!(site.contains("X-CodeB-Rollback \"true\""));

    let audit = fake
        .file(APP_HOST, "/opt/codeb/logs/rollbacks/acme-production.log")
        .expect("rollback audit log missing");
    assert!(audit.contains("\"reason\":\"bug in v2\""));
    assert!(audit.contains("\"fromSlot\":\"green\""));
    assert!(audit.contains("\"toSlot\":\"blue\""));
}

#[tokio::test]
async fn rollback_without_a_grace_slot_is_rejected() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .unwrap();
    let err = state
        .engine
        .rollback("acme", Environment::Production, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoRollbackTarget));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4: cleanup before and after the grace deadline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cleanup_respects_the_grace_window_unless_forced() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    for version in ["v1", "v2"] {
        state
            .engine
            .deploy("acme", Environment::Production, version, None, false)
            .await
            .unwrap();
        state
            .engine
            .promote("acme", Environment::Production)
            .await
            .unwrap();
    }

    // blue is in grace with ~48h left
    let err = state
        .engine
        .cleanup("acme", Environment::Production, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GraceNotExpired { .. }));

    let result = state
        .engine
        .cleanup("acme", Environment::Production, true)
        .await
        .unwrap();
    assert_eq!(result.cleaned_slot, Some(SlotName::Blue));

    let registry = registry_on(&fake);
    assert_eq!(registry.blue.state, SlotState::Empty);
    assert!(registry.blue.version.is_none());
    assert!(registry.blue.grace_expires_at.is_none());
    assert_eq!(registry.blue.health_status, HealthStatus::Unknown);

    assert!(!fake
        .commands_matching("systemctl --user stop acme-production-blue.service")
        .is_empty());
    assert!(!fake
        .commands_matching("podman rm -f acme-production-blue")
        .is_empty());
    assert!(
        fake.file(APP_HOST, &format!("{}/acme-production-blue.container", UNIT_DIR))
            .is_none(),
        "unit file must be removed"
    );
}

#[tokio::test]
async fn cleanup_with_no_grace_slot_is_a_no_op_success() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .unwrap();
    let result = state
        .engine
        .cleanup("acme", Environment::Production, false)
        .await
        .unwrap();
    assert_eq!(result.cleaned_slot, None);
}

#[tokio::test]
async fn cleanup_accepts_an_elapsed_grace_deadline_without_force() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    // seed a registry whose grace window already elapsed
    let mut registry = SlotRegistry::new("acme", Environment::Production, 4000);
    registry.green.state = SlotState::Active;
    registry.green.version = Some("v2".into());
    registry.green.image = Some("localhost/acme:v2".into());
    registry.green.deployed_at = Some(Utc::now());
    registry.green.health_status = HealthStatus::Healthy;
    registry.active_slot = ActiveSlot::Green;
    registry.blue.state = SlotState::Grace;
    registry.blue.version = Some("v1".into());
    registry.blue.image = Some("localhost/acme:v1".into());
    registry.blue.deployed_at = Some(Utc::now() - GraceDuration::hours(72));
    registry.blue.grace_expires_at = Some(Utc::now() - GraceDuration::seconds(1));
    fake.put_file(
        APP_HOST,
        REGISTRY_PATH,
        &serde_json::to_string_pretty(&registry).unwrap(),
    );

    let result = state
        .engine
        .cleanup("acme", Environment::Production, false)
        .await
        .expect("expired grace slot should clean up without force");
    assert_eq!(result.cleaned_slot, Some(SlotName::Blue));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deploy failure reconciliation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn failed_healthcheck_resets_the_slot_and_removes_the_container() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    fake.set_health(4000, "000");
    let err = state
        .engine
        .deploy("acme", Environment::Production, "v1", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HealthcheckFailed { port: 4000, .. }));

    let registry = registry_on(&fake);
    assert_eq!(registry.blue.state, SlotState::Empty);
    assert!(registry.blue.version.is_none());
    assert!(
        registry.blue.error.as_deref().unwrap_or("").contains("4000"),
        "failure is recorded on the slot"
    );

    assert!(!fake
        .commands_matching("podman rm -f acme-production-blue")
        .is_empty());
}

#[tokio::test]
async fn skip_healthcheck_lands_deployed_with_unknown_health() {
    let fake = Arc::new(FakeExecutor::new());
    let state = spawn_state(fake.clone());

    fake.set_health(3000, "000"); // would fail a probe
    let result = state
        .engine
        .deploy("acme", Environment::Staging, "v1", None, true)
        .await
        .expect("skip_healthcheck must bypass the probe");

    assert!(result
        .steps
        .iter()
        .any(|s| s.name == "health_check" && s.status == StepStatus::Skipped));

    let raw = fake
        .file(APP_HOST, "/opt/codeb/registry/slots/acme-staging.json")
        .unwrap();
    let registry: SlotRegistry = serde_json::from_str(&raw).unwrap();
    assert_eq!(registry.blue.state, SlotState::Deployed);
    assert_eq!(registry.blue.health_status, HealthStatus::Unknown);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6: concurrent deploys on the same key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrent_deploys_on_one_key_yield_one_winner_and_slot_busy() {
    let fake = Arc::new(FakeExecutor::with_exec_delay(Duration::from_millis(20)));
    let state = spawn_state(fake.clone());

    let (a, b) = tokio::join!(
        state
            .engine
            .deploy("acme", Environment::Staging, "v1", None, false),
        state
            .engine
            .deploy("acme", Environment::Staging, "v1", None, false),
    );

    let (ok, busy) = match (a, b) {
        (Ok(ok), Err(err)) => (ok, err),
        (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected one winner and one SlotBusy, got {:?}", other),
    };
    assert!(matches!(busy, Error::SlotBusy { .. }));
    assert_eq!(ok.slot, SlotName::Blue);

    // the loser left no side effects: one container start, a valid registry
    assert_eq!(
        fake.commands_matching("systemctl --user start acme-staging-blue.service")
            .len(),
        1
    );
    let raw = fake
        .file(APP_HOST, "/opt/codeb/registry/slots/acme-staging.json")
        .unwrap();
    let registry: SlotRegistry = serde_json::from_str(&raw).unwrap();
    assert_eq!(registry.blue.state, SlotState::Deployed);
    assert!(registry.validate().is_ok());
}

#[tokio::test]
async fn deploys_on_distinct_keys_proceed_in_parallel() {
    let fake = Arc::new(FakeExecutor::with_exec_delay(Duration::from_millis(10)));
    let state = spawn_state(fake.clone());

    let (a, b) = tokio::join!(
        state
            .engine
            .deploy("acme", Environment::Staging, "v1", None, false),
        state
            .engine
            .deploy("globex", Environment::Staging, "v1", None, false),
    );
    let a = a.expect("acme deploy");
    let b = b.expect("globex deploy");

    // distinct projects never share a port
    assert_ne!(a.port, b.port);
    assert!(a.port >= 3000 && a.port < 4000);
    assert!(b.port >= 3000 && b.port < 4000);
}
