//! Emergency detection: hard-forced survival tier
//!
//! Pure predicate over the latest metrics and the consumption analysis.
//! An emergency bypasses hysteresis, consent and route memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consumption::{ConsumptionAnalysis, CRITICAL_BATTERY};
use crate::decision::Decision;
use crate::metrics::MetricsSnapshot;
use crate::tier::Tier;

/// Normalized fps below which the page counts as unresponsive
pub const UNRESPONSIVE_FPS: f64 = 5.0;

/// One contributing cause of an emergency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cause")]
pub enum EmergencyCause {
    Offline,
    CriticalBattery { battery: f64 },
    Unresponsive { fps: f64 },
    RapidDepletion { minutes_remaining: Option<i64> },
}

impl std::fmt::Display for EmergencyCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::CriticalBattery { battery } => write!(f, "critical battery ({:.0}%)", battery),
            Self::Unresponsive { fps } => write!(f, "unresponsive ({:.0} fps)", fps),
            Self::RapidDepletion {
                minutes_remaining: Some(m),
            } => write!(f, "rapid depletion ({} min remaining)", m),
            Self::RapidDepletion {
                minutes_remaining: None,
            } => write!(f, "rapid depletion"),
        }
    }
}

/// Detects survival conditions
#[derive(Debug, Clone)]
pub struct EmergencyDetector {
    hidden_fps_fallback: f64,
}

impl EmergencyDetector {
    pub fn new(hidden_fps_fallback: f64) -> Self {
        Self {
            hidden_fps_fallback,
        }
    }

    /// Every cause currently present; empty means no emergency
    pub fn causes(
        &self,
        metrics: &MetricsSnapshot,
        consumption: &ConsumptionAnalysis,
    ) -> Vec<EmergencyCause> {
        let mut causes = Vec::new();
        if !metrics.online {
            causes.push(EmergencyCause::Offline);
        }
        if metrics.battery < CRITICAL_BATTERY {
            causes.push(EmergencyCause::CriticalBattery {
                battery: metrics.battery,
            });
        }
        let fps = metrics.normalized_fps(self.hidden_fps_fallback);
        if fps < UNRESPONSIVE_FPS {
            causes.push(EmergencyCause::Unresponsive { fps });
        }
        if consumption.critical {
            causes.push(EmergencyCause::RapidDepletion {
                minutes_remaining: consumption.minutes_remaining,
            });
        }
        causes
    }

    pub fn is_emergency(&self, metrics: &MetricsSnapshot, consumption: &ConsumptionAnalysis) -> bool {
        !self.causes(metrics, consumption).is_empty()
    }

    /// Survival-tier decision listing every cause
    pub fn decision(&self, causes: &[EmergencyCause], now: DateTime<Utc>) -> Decision {
        let listed = causes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let mut decision = Decision::new(Tier::D, format!("emergency: {}", listed), 100, now);
        decision.emergency = true;
        decision.auto_switch = true;
        decision
    }
}
