//! Event bus adapter
//!
//! Publishes typed events to the pub/sub broker on the streaming host over
//! HTTP. The engine enqueues into a bounded in-process queue and never
//! blocks; a single worker drains the queue, which preserves enqueue order
//! per channel. Transient delivery failures retry with exponential backoff;
//! exhausted events are dropped with a warning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::configuration::EventBusSettings;
use crate::models::{EventKind, HealthStatus, SlotEvent};

pub const QUEUE_CAPACITY: usize = 1024;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<SlotEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Spawn the drain worker and hand back the enqueue side.
    pub fn start(settings: EventBusSettings) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        tokio::spawn(drain(rx, settings, dropped.clone()));
        Self { tx, dropped }
    }

    /// Non-blocking enqueue. A full queue drops the event rather than
    /// stalling the slot engine.
    pub fn publish(&self, event: SlotEvent) {
        if let Err(err) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("event queue full, dropping event: {}", err);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Channel fan-out per event kind.
pub fn channels_for(event: &SlotEvent) -> Vec<String> {
    let slot_channel = format!("slots.{}.{}", event.project, event.environment);
    let mut channels = vec![slot_channel];

    match event.kind {
        EventKind::DeployStart | EventKind::DeployComplete | EventKind::DeployError => {
            channels.push(format!("deploy.{}", event.project));
            channels.push("system.alerts".to_string());
        }
        EventKind::DeployProgress => {
            channels.push(format!("deploy.{}", event.project));
        }
        EventKind::Promote => {
            channels.push("slots.all".to_string());
            channels.push(format!("promote.{}", event.project));
            channels.push("system.alerts".to_string());
        }
        EventKind::Rollback => {
            channels.push("slots.all".to_string());
            channels.push(format!("rollback.{}", event.project));
            channels.push("system.alerts".to_string());
        }
        EventKind::HealthChange => {
            channels.push(format!("health.{}", event.project));
            let unhealthy = event
                .metadata
                .as_ref()
                .and_then(|m| m.get("healthStatus"))
                .and_then(|v| serde_json::from_value::<HealthStatus>(v.clone()).ok())
                == Some(HealthStatus::Unhealthy);
            if unhealthy {
                channels.push("system.alerts".to_string());
            }
        }
        EventKind::SlotCleanup => {
            channels.push("slots.all".to_string());
        }
    }

    channels
}

async fn drain(
    mut rx: mpsc::Receiver<SlotEvent>,
    settings: EventBusSettings,
    dropped: Arc<AtomicU64>,
) {
    if settings.api_url.is_empty() {
        tracing::info!("event bus has no api_url configured; events will be discarded");
    }
    let client = reqwest::Client::new();

    while let Some(event) = rx.recv().await {
        if settings.api_url.is_empty() {
            tracing::debug!("discarding {} event for {}", event.kind, event.project);
            continue;
        }
        for channel in channels_for(&event) {
            if !deliver(&client, &settings, &channel, &event).await {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "dropping {} event for channel {} after {} attempts",
                    event.kind,
                    channel,
                    MAX_ATTEMPTS
                );
            }
        }
    }
}

async fn deliver(
    client: &reqwest::Client,
    settings: &EventBusSettings,
    channel: &str,
    event: &SlotEvent,
) -> bool {
    let url = format!("{}/publish", settings.api_url.trim_end_matches('/'));
    let body = serde_json::json!({ "channel": channel, "event": event });

    for attempt in 0..MAX_ATTEMPTS {
        let response = client
            .post(&url)
            .bearer_auth(&settings.api_key)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => return true,
            Ok(resp) => {
                tracing::warn!(
                    "event publish to {} returned {} (attempt {})",
                    channel,
                    resp.status(),
                    attempt + 1
                );
            }
            Err(err) => {
                tracing::warn!(
                    "event publish to {} failed: {} (attempt {})",
                    channel,
                    err,
                    attempt + 1
                );
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Environment, SlotName};
    use serde_json::json;

    fn event(kind: EventKind) -> SlotEvent {
        SlotEvent::new(kind, "acme", Environment::Staging, "test").with_slot(SlotName::Blue)
    }

    #[test]
    fn deploy_events_reach_slot_deploy_and_system_channels() {
        let channels = channels_for(&event(EventKind::DeployComplete));
        assert_eq!(
            channels,
            ["slots.acme.staging", "deploy.acme", "system.alerts"]
        );
    }

    #[test]
    fn deploy_progress_skips_the_system_channel() {
        let channels = channels_for(&event(EventKind::DeployProgress));
        assert_eq!(channels, ["slots.acme.staging", "deploy.acme"]);
    }

    #[test]
    fn promote_and_rollback_reach_the_global_slot_channel() {
        let channels = channels_for(&event(EventKind::Promote));
        assert_eq!(
            channels,
            [
                "slots.acme.staging",
                "slots.all",
                "promote.acme",
                "system.alerts"
            ]
        );

        let channels = channels_for(&event(EventKind::Rollback));
        assert!(channels.contains(&"rollback.acme".to_string()));
        assert!(channels.contains(&"slots.all".to_string()));
    }

    #[test]
    fn unhealthy_health_change_raises_a_system_alert() {
        let healthy = event(EventKind::HealthChange)
            .with_metadata(json!({ "healthStatus": "healthy" }));
        assert!(!channels_for(&healthy).contains(&"system.alerts".to_string()));

        let unhealthy = event(EventKind::HealthChange)
            .with_metadata(json!({ "healthStatus": "unhealthy" }));
        assert!(channels_for(&unhealthy).contains(&"system.alerts".to_string()));
        assert!(channels_for(&unhealthy).contains(&"health.acme".to_string()));
    }
}
