//! Fail-safe event emission with online/offline routing.
//!
//! Construction failures (unknown event type, missing payload fields, bad
//! ids) return `None` and log once; they never raise to the caller. A
//! connected, authenticated transport gets the event directly; any transport
//! failure falls back to the durable queue. A queue capacity rejection is
//! logged as a warning and the validated event is returned anyway.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::Result;
use crate::feature::WpId;
use crate::status::lane::Lane;
use crate::sync::auth::{AccountScope, AuthClient};
use crate::sync::clock::LamportClock;
use crate::sync::envelope::EventEnvelope;
use crate::sync::queue::OfflineQueue;

/// Online delivery channel (WebSocket or equivalent).
#[async_trait]
pub trait EventTransport: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn send_event(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Event kinds the emitter knows how to validate.
const KNOWN_EVENT_TYPES: &[(&str, &[&str])] = &[
    ("WPStatusChanged", &["wp_id", "from_lane", "to_lane", "actor"]),
    ("WPCreated", &["wp_id", "title", "feature_slug"]),
    ("WPAssigned", &["wp_id", "assignee"]),
    ("FeatureCreated", &["feature_slug"]),
    ("HistoryNoteAdded", &["wp_id", "note"]),
    ("ExecutionEvent", &["wp_id", "role"]),
];

/// Emitter bound to one account scope.
pub struct EventEmitter {
    scope: AccountScope,
    queue: Arc<OfflineQueue>,
    auth: Arc<AuthClient>,
    transport: Option<Arc<dyn EventTransport>>,
    clock: Mutex<LamportClock>,
}

impl EventEmitter {
    #[must_use]
    pub fn new(
        scope: AccountScope,
        queue: Arc<OfflineQueue>,
        auth: Arc<AuthClient>,
        clock: LamportClock,
    ) -> Self {
        Self {
            scope,
            queue,
            auth,
            transport: None,
            clock: Mutex::new(clock),
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub const fn scope(&self) -> &AccountScope {
        &self.scope
    }

    /// Mint a fresh id usable as a causation/correlation id.
    #[must_use]
    pub fn generate_causation_id(&self) -> String {
        ulid::Ulid::new().to_string()
    }

    /// Emit a WP lane transition event.
    pub async fn emit_wp_status_changed(
        &self,
        wp_id: &str,
        from_lane: Lane,
        to_lane: Lane,
        actor: &str,
        feature_slug: Option<&str>,
        causation_id: Option<String>,
    ) -> Option<EventEnvelope> {
        if WpId::parse(wp_id).is_err() {
            warn!(wp_id, "discarding WPStatusChanged event with invalid wp_id");
            return None;
        }
        self.emit(
            "WPStatusChanged",
            wp_id,
            "WorkPackage",
            serde_json::json!({
                "wp_id": wp_id,
                "from_lane": from_lane,
                "to_lane": to_lane,
                "actor": actor,
                "feature_slug": feature_slug,
            }),
            causation_id,
            None,
        )
        .await
    }

    /// Emit a WP creation event.
    pub async fn emit_wp_created(
        &self,
        wp_id: &str,
        title: &str,
        feature_slug: &str,
    ) -> Option<EventEnvelope> {
        self.emit(
            "WPCreated",
            wp_id,
            "WorkPackage",
            serde_json::json!({
                "wp_id": wp_id,
                "title": title,
                "feature_slug": feature_slug,
            }),
            None,
            None,
        )
        .await
    }

    /// Emit a WP assignment event.
    pub async fn emit_wp_assigned(&self, wp_id: &str, assignee: &str) -> Option<EventEnvelope> {
        self.emit(
            "WPAssigned",
            wp_id,
            "WorkPackage",
            serde_json::json!({"wp_id": wp_id, "assignee": assignee}),
            None,
            None,
        )
        .await
    }

    /// Emit a feature creation event.
    pub async fn emit_feature_created(&self, feature_slug: &str) -> Option<EventEnvelope> {
        self.emit(
            "FeatureCreated",
            feature_slug,
            "Feature",
            serde_json::json!({"feature_slug": feature_slug}),
            None,
            None,
        )
        .await
    }

    /// Emit a history note event.
    pub async fn emit_history_note(&self, wp_id: &str, note: &str) -> Option<EventEnvelope> {
        self.emit(
            "HistoryNoteAdded",
            wp_id,
            "WorkPackage",
            serde_json::json!({"wp_id": wp_id, "note": note}),
            None,
            None,
        )
        .await
    }

    /// Build, validate, and route one envelope.
    pub async fn emit(
        &self,
        event_type: &str,
        aggregate_id: &str,
        aggregate_type: &str,
        payload: serde_json::Value,
        causation_id: Option<String>,
        correlation_id: Option<String>,
    ) -> Option<EventEnvelope> {
        let Some(required) = KNOWN_EVENT_TYPES
            .iter()
            .find(|(name, _)| *name == event_type)
            .map(|(_, fields)| *fields)
        else {
            warn!(event_type, "discarding event of unknown type");
            return None;
        };
        for field in required {
            let ok = match payload.get(field) {
                Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
                Some(serde_json::Value::Null) | None => false,
                Some(_) => true,
            };
            if !ok {
                warn!(event_type, field, "discarding event with missing payload field");
                return None;
            }
        }

        let (tick, node_id) = {
            let mut clock = match self.clock.lock() {
                Ok(clock) => clock,
                Err(poisoned) => poisoned.into_inner(),
            };
            let tick = match clock.tick() {
                Ok(tick) => tick,
                Err(err) => {
                    warn!(%err, "clock tick failed; continuing with in-memory value");
                    clock.value
                }
            };
            (tick, clock.node_id.clone())
        };

        let mut envelope = EventEnvelope {
            event_id: ulid::Ulid::new().to_string(),
            event_type: event_type.to_string(),
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: aggregate_type.to_string(),
            payload,
            node_id,
            lamport_clock: tick,
            causation_id,
            correlation_id,
            timestamp: Utc::now(),
            team_slug: self.scope.team_slug.clone(),
        };
        if !envelope.normalize_ids() {
            warn!(event_type, "discarding event with invalid envelope ids");
            return None;
        }

        self.route(&envelope).await;
        Some(envelope)
    }

    /// Online when connected and authenticated; queue otherwise, and queue
    /// again on any transport failure.
    async fn route(&self, envelope: &EventEnvelope) {
        if let Some(transport) = &self.transport {
            if transport.is_connected() && self.auth.is_authenticated() {
                match transport.send_event(envelope).await {
                    Ok(()) => return,
                    Err(err) => {
                        warn!(%err, event_id = %envelope.event_id, "transport send failed; queueing event");
                    }
                }
            }
        }
        match self.queue.enqueue(&self.scope.key(), envelope).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(event_id = %envelope.event_id, "offline queue full; event not persisted");
            }
            Err(err) => {
                warn!(%err, event_id = %envelope.event_id, "failed to enqueue event");
            }
        }
    }
}
