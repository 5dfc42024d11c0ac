//! Route memory: per-view tier floor for the current session
//!
//! Records the richest tier each route has been rendered at. A later
//! decision that would show the same route poorer is vetoed and raised
//! back to the recorded tier. Records only ever rise; they are dropped
//! when the client's session is reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::decision::{Decision, RouteContext};
use crate::tier::Tier;

/// Highest tier achieved on one route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTierRecord {
    pub tier: Tier,
    pub timestamp: DateTime<Utc>,
}

/// Route records for one client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteMemory {
    records: HashMap<String, RouteTierRecord>,
}

impl RouteMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, route: &str) -> Option<&RouteTierRecord> {
        self.records.get(route)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Snapshot of all records, sorted by route
    pub fn records(&self) -> Vec<(String, RouteTierRecord)> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|(route, record)| (route.clone(), *record))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    /// Record `tier` for `route` if it does not lower the stored rank.
    /// Returns true when the record changed.
    pub fn record(&mut self, route: &str, tier: Tier, timestamp: DateTime<Utc>) -> bool {
        match self.records.get_mut(route) {
            Some(existing) if tier > existing.tier => {
                *existing = RouteTierRecord { tier, timestamp };
                true
            }
            Some(_) => false,
            None => {
                self.records
                    .insert(route.to_string(), RouteTierRecord { tier, timestamp });
                true
            }
        }
    }

    /// Gate a policy decision through the route's recorded tier.
    ///
    /// Emergencies pass through untouched but are still recorded. A revisit
    /// that proposes a poorer tier than recorded is raised to the recorded
    /// tier.
    pub fn apply(&mut self, route: &str, mut decision: Decision) -> Decision {
        let remembered = self.records.get(route).map(|r| r.tier);
        let timestamp = decision.timestamp;

        if decision.emergency {
            self.record(route, decision.tier, timestamp);
            decision.route_context = Some(RouteContext {
                route: route.to_string(),
                remembered_tier: remembered,
                first_visit: remembered.is_none(),
                prevented_downgrade: false,
                proposed_tier: None,
            });
            return decision;
        }

        let Some(remembered) = remembered else {
            self.record(route, decision.tier, timestamp);
            decision.route_context = Some(RouteContext {
                route: route.to_string(),
                remembered_tier: None,
                first_visit: true,
                prevented_downgrade: false,
                proposed_tier: None,
            });
            return decision;
        };

        if decision.tier < remembered {
            let proposed = decision.tier;
            debug!(
                route,
                proposed = %proposed,
                remembered = %remembered,
                "Route memory prevented downgrade"
            );
            decision.set_tier(remembered);
            decision.confidence = 100;
            decision.auto_switch = true;
            decision.reason = format!(
                "route {} already rendered at tier {} this session",
                route, remembered
            );
            decision.route_context = Some(RouteContext {
                route: route.to_string(),
                remembered_tier: Some(remembered),
                first_visit: false,
                prevented_downgrade: true,
                proposed_tier: Some(proposed),
            });
            return decision;
        }

        self.record(route, decision.tier, timestamp);
        decision.route_context = Some(RouteContext {
            route: route.to_string(),
            remembered_tier: Some(remembered),
            first_visit: false,
            prevented_downgrade: false,
            proposed_tier: None,
        });
        decision
    }
}
