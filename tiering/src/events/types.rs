//! Event types for tier decisions
//!
//! Every state change the engine makes for a client is published as one of
//! these events. Client push channels filter by client id; observers take
//! everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consent::Consent;
use crate::decision::Decision;
use crate::metrics::MetricsSnapshot;
use crate::session::ClientId;
use crate::tier::Tier;

/// Unique identifier for events
pub type EventId = String;

/// All tier engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TierEvent {
    /// A decision the client must act on
    DecisionPushed {
        event_id: EventId,
        client_id: ClientId,
        route: String,
        decision: Decision,
        timestamp: DateTime<Utc>,
    },

    /// Throttled copy of a stable decision for dashboards
    ObserverSnapshot {
        client_id: ClientId,
        route: String,
        decision: Decision,
        metrics: MetricsSnapshot,
        timestamp: DateTime<Utc>,
    },

    /// The client answered a consent prompt or changed its standing answer
    ConsentRecorded {
        client_id: ClientId,
        consent: Consent,
        timestamp: DateTime<Utc>,
    },

    /// Manual override set (`Some`) or cleared (`None`)
    OverrideChanged {
        client_id: ClientId,
        tier: Option<Tier>,
        timestamp: DateTime<Utc>,
    },

    /// Committed tier and route memory were dropped
    SessionReset {
        client_id: ClientId,
        timestamp: DateTime<Utc>,
    },

    /// State purged after the disconnect grace period
    SessionEvicted {
        client_id: ClientId,
        timestamp: DateTime<Utc>,
    },

    /// Forced metrics set or cleared
    DebugMetricsChanged {
        client_id: ClientId,
        active: bool,
        timestamp: DateTime<Utc>,
    },
}

impl TierEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TierEvent::DecisionPushed { timestamp, .. } => *timestamp,
            TierEvent::ObserverSnapshot { timestamp, .. } => *timestamp,
            TierEvent::ConsentRecorded { timestamp, .. } => *timestamp,
            TierEvent::OverrideChanged { timestamp, .. } => *timestamp,
            TierEvent::SessionReset { timestamp, .. } => *timestamp,
            TierEvent::SessionEvicted { timestamp, .. } => *timestamp,
            TierEvent::DebugMetricsChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            TierEvent::DecisionPushed { .. } => "decision_pushed",
            TierEvent::ObserverSnapshot { .. } => "observer_snapshot",
            TierEvent::ConsentRecorded { .. } => "consent_recorded",
            TierEvent::OverrideChanged { .. } => "override_changed",
            TierEvent::SessionReset { .. } => "session_reset",
            TierEvent::SessionEvicted { .. } => "session_evicted",
            TierEvent::DebugMetricsChanged { .. } => "debug_metrics_changed",
        }
    }

    /// Client this event concerns
    pub fn client_id(&self) -> &str {
        match self {
            TierEvent::DecisionPushed { client_id, .. }
            | TierEvent::ObserverSnapshot { client_id, .. }
            | TierEvent::ConsentRecorded { client_id, .. }
            | TierEvent::OverrideChanged { client_id, .. }
            | TierEvent::SessionReset { client_id, .. }
            | TierEvent::SessionEvicted { client_id, .. }
            | TierEvent::DebugMetricsChanged { client_id, .. } => client_id,
        }
    }

    /// Decision carried by this event, if any
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            TierEvent::DecisionPushed { decision, .. }
            | TierEvent::ObserverSnapshot { decision, .. } => Some(decision),
            _ => None,
        }
    }

    /// Create a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = TierEvent::OverrideChanged {
            client_id: "c1".to_string(),
            tier: Some(Tier::C),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "override_changed");
        assert_eq!(json["tier"], "C");
        assert_eq!(event.client_id(), "c1");
        assert!(event.decision().is_none());
    }

    #[test]
    fn test_new_id_is_unique() {
        assert_ne!(TierEvent::new_id(), TierEvent::new_id());
    }
}
