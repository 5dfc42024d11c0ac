//! Per-client session state
//!
//! Everything the engine knows about a client lives in one
//! [`ClientContext`], guarded by its own lock in the [`SessionStore`]
//! so all operations for a client are serialized.
//!
//! [`SessionStore`]: crate::store::SessionStore

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consent::ConsentLedger;
use crate::consumption::ConsumptionTracker;
use crate::metrics::{MetricsSnapshot, TelemetryMessage};
use crate::route_memory::RouteMemory;
use crate::tier::Tier;

/// Client identifier as sent by the client
pub type ClientId = String;

/// Committed tier state for one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSession {
    pub client_id: ClientId,
    /// `None` until the first decision is committed (or after a reset)
    pub current_tier: Option<Tier>,
    pub last_switch: Option<DateTime<Utc>>,
    pub manual_override: Option<Tier>,
    pub created_at: DateTime<Utc>,
}

impl ClientSession {
    pub fn new(client_id: impl Into<ClientId>, now: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            current_tier: None,
            last_switch: None,
            manual_override: None,
            created_at: now,
        }
    }

    /// No committed tier yet
    pub fn is_new(&self) -> bool {
        self.current_tier.is_none()
    }

    /// Commit a tier and restart the hysteresis window
    pub fn commit(&mut self, tier: Tier, now: DateTime<Utc>) {
        self.current_tier = Some(tier);
        self.last_switch = Some(now);
    }

    /// Time since the last committed switch; `None` if never switched
    pub fn time_since_switch(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_switch.map(|at| now - at)
    }
}

/// All state held for one client
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub session: ClientSession,
    pub consumption: ConsumptionTracker,
    pub consent: ConsentLedger,
    pub routes: RouteMemory,
    /// Last telemetry frame that produced a decision
    pub last_telemetry: Option<TelemetryMessage>,
    /// Forced snapshot that replaces incoming metrics while set
    pub debug_metrics: Option<MetricsSnapshot>,
    /// When the last observer snapshot was published
    pub last_observer_emit: Option<DateTime<Utc>>,
    /// Tier of the last decision handed back to the client, after route
    /// memory. Differs from the committed tier when a route floor applies.
    pub last_delivered_tier: Option<Tier>,
}

impl ClientContext {
    pub fn new(client_id: impl Into<ClientId>, consumption_window: usize, now: DateTime<Utc>) -> Self {
        Self {
            session: ClientSession::new(client_id, now),
            consumption: ConsumptionTracker::new(consumption_window),
            consent: ConsentLedger::new(),
            routes: RouteMemory::new(),
            last_telemetry: None,
            debug_metrics: None,
            last_observer_emit: None,
            last_delivered_tier: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.session.client_id
    }

    /// Drop the committed tier and route memory so the next telemetry is
    /// treated as a first connection. Override, consent and battery history
    /// are kept.
    pub fn reset(&mut self) {
        self.session.current_tier = None;
        self.session.last_switch = None;
        self.last_delivered_tier = None;
        self.routes.clear();
    }

    pub fn set_override(&mut self, tier: Tier) {
        self.session.manual_override = Some(tier);
    }

    pub fn clear_override(&mut self) {
        self.session.manual_override = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_commit_tracks_switch_time() {
        let now = Utc::now();
        let mut session = ClientSession::new("c1", now);
        assert!(session.is_new());
        assert_eq!(session.time_since_switch(now), None);

        session.commit(Tier::B, now);
        assert!(!session.is_new());
        assert_eq!(
            session.time_since_switch(now + Duration::seconds(4)),
            Some(Duration::seconds(4))
        );
    }

    #[test]
    fn test_reset_keeps_override_and_history() {
        let now = Utc::now();
        let mut ctx = ClientContext::new("c1", 10, now);
        ctx.session.commit(Tier::D, now);
        ctx.set_override(Tier::B);
        ctx.consumption.add_reading(50.0, false, now);
        ctx.routes.record("/home", Tier::D, now);

        ctx.reset();

        assert!(ctx.session.is_new());
        assert!(ctx.routes.is_empty());
        assert_eq!(ctx.session.manual_override, Some(Tier::B));
        assert_eq!(ctx.consumption.len(), 1);
    }
}
