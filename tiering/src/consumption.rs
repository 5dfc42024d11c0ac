//! Battery drain tracking over a bounded sliding window of readings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples kept per client
pub const DEFAULT_WINDOW: usize = 10;

/// Drain rate (%/min) above which the trend is `High`
pub const HIGH_DRAIN_RATE: f64 = 0.5;
/// Drain rate (%/min) above which the trend is `Moderate`
pub const MODERATE_DRAIN_RATE: f64 = 0.3;
/// Drain rate (%/min) above which the trend is `Normal`
pub const NORMAL_DRAIN_RATE: f64 = 0.1;
/// Projected runtime below which drain is critical
pub const CRITICAL_MINUTES_REMAINING: i64 = 30;
/// Battery level below which the device is critical regardless of trend
pub const CRITICAL_BATTERY: f64 = 5.0;

/// One battery reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionSample {
    pub battery: f64,
    pub charging: bool,
    pub timestamp: DateTime<Utc>,
}

/// Direction and speed of battery drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainTrend {
    /// Fewer than two samples
    Unknown,
    Charging,
    Stable,
    Normal,
    Moderate,
    High,
}

impl DrainTrend {
    /// Whether the drain is fast enough to justify a lighter tier
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::High | Self::Moderate)
    }
}

impl std::fmt::Display for DrainTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Charging => "charging",
            Self::Stable => "stable",
            Self::Normal => "normal",
            Self::Moderate => "moderate",
            Self::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Derived view over a client's consumption window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionAnalysis {
    /// Drain in percent per minute; positive means discharging
    pub rate: f64,
    pub trend: DrainTrend,
    pub critical: bool,
    pub minutes_remaining: Option<i64>,
    pub is_charging: bool,
}

impl ConsumptionAnalysis {
    fn unknown() -> Self {
        Self {
            rate: 0.0,
            trend: DrainTrend::Unknown,
            critical: false,
            minutes_remaining: None,
            is_charging: false,
        }
    }

    fn charging() -> Self {
        Self {
            rate: 0.0,
            trend: DrainTrend::Charging,
            critical: false,
            minutes_remaining: None,
            is_charging: true,
        }
    }
}

/// Per-client sliding window of battery readings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionTracker {
    samples: VecDeque<ConsumptionSample>,
    capacity: usize,
}

impl ConsumptionTracker {
    /// Create a tracker keeping at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, dropping the oldest once the window is full
    pub fn add_reading(&mut self, battery: f64, charging: bool, timestamp: DateTime<Utc>) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ConsumptionSample {
            battery,
            charging,
            timestamp,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &ConsumptionSample> {
        self.samples.iter()
    }

    /// Drain rate and trend between the oldest and newest sample
    pub fn consumption_rate(&self) -> ConsumptionAnalysis {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() >= 2 => (first, last),
            _ => return ConsumptionAnalysis::unknown(),
        };

        if last.charging {
            return ConsumptionAnalysis::charging();
        }

        let battery_drop = first.battery - last.battery;
        let elapsed_ms = (last.timestamp - first.timestamp).num_milliseconds();
        let elapsed_min = elapsed_ms as f64 / 60_000.0;

        if elapsed_ms == 0 {
            return ConsumptionAnalysis {
                rate: 0.0,
                trend: DrainTrend::Stable,
                critical: last.battery < CRITICAL_BATTERY,
                minutes_remaining: None,
                is_charging: last.charging,
            };
        }

        let rate = battery_drop / elapsed_min;
        let trend = if rate > HIGH_DRAIN_RATE {
            DrainTrend::High
        } else if rate > MODERATE_DRAIN_RATE {
            DrainTrend::Moderate
        } else if rate > NORMAL_DRAIN_RATE {
            DrainTrend::Normal
        } else {
            DrainTrend::Stable
        };

        let minutes_remaining = if rate > 0.0 {
            Some((last.battery / rate).floor() as i64)
        } else {
            None
        };

        let critical = minutes_remaining.is_some_and(|m| m < CRITICAL_MINUTES_REMAINING)
            || last.battery < CRITICAL_BATTERY;

        ConsumptionAnalysis {
            rate,
            trend,
            critical,
            minutes_remaining,
            is_charging: last.charging,
        }
    }
}

impl Default for ConsumptionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
