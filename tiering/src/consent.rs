//! Per-client consent slot gating battery-motivated downgrades
//!
//! `always-optimize` and `never-optimize` are standing preferences.
//! `accept` and `deny` answer a single pending consent request and are
//! cleared as soon as they have been applied.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::TierError;

/// Consent answer submitted by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Consent {
    Accept,
    Deny,
    AlwaysOptimize,
    NeverOptimize,
}

impl Consent {
    /// Whether this answer persists across future decisions
    pub fn is_standing(self) -> bool {
        matches!(self, Self::AlwaysOptimize | Self::NeverOptimize)
    }

    /// Whether this answer authorizes a downgrade
    pub fn authorizes_downgrade(self) -> bool {
        matches!(self, Self::Accept | Self::AlwaysOptimize)
    }
}

impl std::fmt::Display for Consent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accept => "accept",
            Self::Deny => "deny",
            Self::AlwaysOptimize => "always-optimize",
            Self::NeverOptimize => "never-optimize",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Consent {
    type Err = TierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "accept" => Ok(Self::Accept),
            "deny" => Ok(Self::Deny),
            "always-optimize" => Ok(Self::AlwaysOptimize),
            "never-optimize" => Ok(Self::NeverOptimize),
            _ => Err(TierError::UnknownConsent(s.to_string())),
        }
    }
}

/// Single consent slot for one client. Last write wins, no expiry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentLedger {
    slot: Option<Consent>,
}

impl ConsentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, consent: Consent) {
        self.slot = Some(consent);
    }

    /// Current preference, `None` when unset
    pub fn get(&self) -> Option<Consent> {
        self.slot
    }

    /// Read the slot for a pending downgrade request. One-shot answers are
    /// consumed here; standing preferences stay in place.
    pub fn take_for_request(&mut self) -> Option<Consent> {
        let consent = self.slot?;
        if !consent.is_standing() {
            self.slot = None;
        }
        Some(consent)
    }

    /// Drop a one-shot answer that was not used
    pub fn clear_one_shot(&mut self) {
        if self.slot.is_some_and(|c| !c.is_standing()) {
            self.slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_consent() {
        assert_eq!("always-optimize".parse::<Consent>().unwrap(), Consent::AlwaysOptimize);
        assert_eq!("NEVER_OPTIMIZE".parse::<Consent>().unwrap(), Consent::NeverOptimize);
        assert!(matches!(
            "maybe".parse::<Consent>(),
            Err(TierError::UnknownConsent(_))
        ));
    }

    #[test]
    fn test_last_write_wins() {
        let mut ledger = ConsentLedger::new();
        assert_eq!(ledger.get(), None);
        ledger.record(Consent::AlwaysOptimize);
        ledger.record(Consent::NeverOptimize);
        assert_eq!(ledger.get(), Some(Consent::NeverOptimize));
    }

    #[test]
    fn test_one_shot_consumed() {
        let mut ledger = ConsentLedger::new();
        ledger.record(Consent::Accept);
        assert_eq!(ledger.take_for_request(), Some(Consent::Accept));
        assert_eq!(ledger.get(), None);
        assert_eq!(ledger.take_for_request(), None);
    }

    #[test]
    fn test_standing_preference_persists() {
        let mut ledger = ConsentLedger::new();
        ledger.record(Consent::AlwaysOptimize);
        assert_eq!(ledger.take_for_request(), Some(Consent::AlwaysOptimize));
        assert_eq!(ledger.take_for_request(), Some(Consent::AlwaysOptimize));
        ledger.clear_one_shot();
        assert_eq!(ledger.get(), Some(Consent::AlwaysOptimize));
    }

    #[test]
    fn test_serde_kebab_case() {
        let c: Consent = serde_json::from_str("\"never-optimize\"").unwrap();
        assert_eq!(c, Consent::NeverOptimize);
    }
}
