//! Tier decisions: the engine's only output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consumption::ConsumptionAnalysis;
use crate::tier::{Tier, TierConstraints};

/// Which way a committed switch moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upgrade,
    Downgrade,
}

/// Signal that authorized a downgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    /// Frame rate collapsed; applied without consent
    Performance,
    /// Battery drain with user consent on file
    BatteryConsent,
}

/// Route-memory annotations attached to a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteContext {
    pub route: String,
    /// Highest tier recorded for this route before this decision
    pub remembered_tier: Option<Tier>,
    pub first_visit: bool,
    pub prevented_downgrade: bool,
    /// Tier the policy proposed before route memory raised it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_tier: Option<Tier>,
}

/// A tier decision for one client at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub tier: Tier,
    pub reason: String,
    /// 0..=100
    pub confidence: u8,
    pub constraints: TierConstraints,
    pub timestamp: DateTime<Utc>,

    pub auto_switch: bool,
    pub is_override: bool,
    pub emergency: bool,
    pub requires_consent: bool,
    pub skip_switch: bool,
    pub is_first_connection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,

    /// Tier the client would move to if it consented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumption: Option<ConsumptionAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_context: Option<RouteContext>,
}

impl Decision {
    /// Plain decision with every flag cleared
    pub fn new(
        tier: Tier,
        reason: impl Into<String>,
        confidence: u8,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tier,
            reason: reason.into(),
            confidence: confidence.min(100),
            constraints: tier.constraints(),
            timestamp,
            auto_switch: false,
            is_override: false,
            emergency: false,
            requires_consent: false,
            skip_switch: false,
            is_first_connection: false,
            direction: None,
            trigger: None,
            suggested_tier: None,
            consumption: None,
            route_context: None,
        }
    }

    /// Replace the tier, keeping constraints in sync
    pub fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
        self.constraints = tier.constraints();
    }

    /// Whether the policy asked for a tier switch to be applied
    pub fn is_switch(&self) -> bool {
        self.auto_switch && !self.skip_switch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_decision_defaults() {
        let d = Decision::new(Tier::B, "stable", 180, Utc::now());
        assert_eq!(d.confidence, 100);
        assert_eq!(d.constraints, Tier::B.constraints());
        assert!(!d.is_switch());
    }

    #[test]
    fn test_set_tier_updates_constraints() {
        let mut d = Decision::new(Tier::A, "upgrade", 90, Utc::now());
        d.set_tier(Tier::D);
        assert_eq!(d.constraints, Tier::D.constraints());
    }

    #[test]
    fn test_serializes_camel_case_and_skips_empty() {
        let mut d = Decision::new(Tier::A, "stable", 80, Utc::now());
        d.requires_consent = true;
        d.suggested_tier = Some(Tier::B);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["requiresConsent"], true);
        assert_eq!(json["suggestedTier"], "B");
        assert!(json.get("routeContext").is_none());
        assert!(json.get("direction").is_none());
    }
}
