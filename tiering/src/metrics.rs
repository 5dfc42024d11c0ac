//! Client telemetry: metrics snapshots and the ingest message envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TierError, TierResult};

/// Fps reported by a hidden or unmeasured page is replaced by this value.
///
/// Backgrounded tabs report `0` or nothing; treating that as a stall would
/// push every hidden tab into the survival tier.
pub const DEFAULT_HIDDEN_FPS_FALLBACK: f64 = 60.0;

/// Connection class reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Wifi,
    Ethernet,
    #[serde(rename = "4g")]
    Cellular4g,
    #[serde(rename = "3g")]
    Cellular3g,
    #[serde(rename = "2g")]
    Cellular2g,
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One device/network/performance reading from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Battery level, 0..=100
    pub battery: f64,
    #[serde(default)]
    pub battery_charging: bool,
    #[serde(default)]
    pub network_type: NetworkType,
    /// Downlink estimate in Mbit/s
    #[serde(default)]
    pub network_downlink: f64,
    /// Device CPU score, 0..=100
    pub cpu_score: f64,
    /// Measured frame rate; `None` when the page could not measure it
    #[serde(default)]
    pub fps: Option<f64>,
    /// Memory in MB
    #[serde(default)]
    pub memory_total: f64,
    #[serde(default)]
    pub memory_used: f64,
    pub online: bool,
}

impl MetricsSnapshot {
    /// Reject snapshots that cannot be reasoned about.
    pub fn validate(&self) -> TierResult<()> {
        check_percent("battery", self.battery)?;
        check_percent("cpuScore", self.cpu_score)?;
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps < 0.0 {
                return Err(TierError::invalid_metrics(
                    "fps",
                    format!("must be a non-negative number, got {}", fps),
                ));
            }
        }
        for (field, value) in [
            ("networkDownlink", self.network_downlink),
            ("memoryTotal", self.memory_total),
            ("memoryUsed", self.memory_used),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TierError::invalid_metrics(
                    field,
                    format!("must be a non-negative number, got {}", value),
                ));
            }
        }
        Ok(())
    }

    /// Frame rate with the page-visibility heuristic applied: null or zero
    /// reads as `hidden_fallback`.
    pub fn normalized_fps(&self, hidden_fallback: f64) -> f64 {
        match self.fps {
            Some(fps) if fps > 0.0 => fps,
            _ => hidden_fallback,
        }
    }
}

fn check_percent(field: &'static str, value: f64) -> TierResult<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(TierError::invalid_metrics(
            field,
            format!("must be within 0..=100, got {}", value),
        ));
    }
    Ok(())
}

/// Ingest envelope: one telemetry frame for one client on one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub client_id: String,
    #[serde(default = "default_route")]
    pub route: String,
    pub metrics: MetricsSnapshot,
    pub timestamp: DateTime<Utc>,
}

fn default_route() -> String {
    "/".to_string()
}

impl TelemetryMessage {
    pub fn new(
        client_id: impl Into<String>,
        route: impl Into<String>,
        metrics: MetricsSnapshot,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            route: route.into(),
            metrics,
            timestamp,
        }
    }

    /// Validate envelope and metrics. The client id is trimmed; an empty
    /// route is treated as `/`.
    pub fn validate(&mut self) -> TierResult<()> {
        let trimmed = self.client_id.trim();
        if trimmed.is_empty() {
            return Err(TierError::MissingClientId);
        }
        if trimmed.len() != self.client_id.len() {
            self.client_id = trimmed.to_string();
        }
        if self.route.trim().is_empty() {
            self.route = default_route();
        }
        self.metrics.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            battery: 80.0,
            battery_charging: false,
            network_type: NetworkType::Wifi,
            network_downlink: 10.0,
            cpu_score: 70.0,
            fps: Some(58.0),
            memory_total: 8192.0,
            memory_used: 2048.0,
            online: true,
        }
    }

    #[test]
    fn test_normalized_fps_hidden_page() {
        let mut m = snapshot();
        m.fps = None;
        assert_eq!(m.normalized_fps(DEFAULT_HIDDEN_FPS_FALLBACK), 60.0);
        m.fps = Some(0.0);
        assert_eq!(m.normalized_fps(DEFAULT_HIDDEN_FPS_FALLBACK), 60.0);
        m.fps = Some(3.0);
        assert_eq!(m.normalized_fps(DEFAULT_HIDDEN_FPS_FALLBACK), 3.0);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut m = snapshot();
        m.battery = 101.0;
        assert!(matches!(
            m.validate(),
            Err(TierError::InvalidMetrics {
                field: "battery",
                ..
            })
        ));

        let mut m = snapshot();
        m.cpu_score = f64::NAN;
        assert!(m.validate().is_err());

        let mut m = snapshot();
        m.fps = Some(-1.0);
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_message_validation() {
        let mut msg = TelemetryMessage::new("", "/", snapshot(), Utc::now());
        assert_eq!(msg.validate(), Err(TierError::MissingClientId));

        let mut msg = TelemetryMessage::new(" c1 ", "  ", snapshot(), Utc::now());
        msg.validate().unwrap();
        assert_eq!(msg.route, "/");
        assert_eq!(msg.client_id, "c1");
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "clientId": "c1",
            "route": "/listing/42",
            "timestamp": "2026-01-01T00:00:00Z",
            "metrics": {
                "battery": 55,
                "batteryCharging": true,
                "networkType": "4g",
                "cpuScore": 40,
                "fps": null,
                "online": true
            }
        }"#;
        let msg: TelemetryMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.metrics.network_type, NetworkType::Cellular4g);
        assert!(msg.metrics.battery_charging);
        assert_eq!(msg.metrics.fps, None);
    }

    #[test]
    fn test_unknown_network_type() {
        let nt: NetworkType = serde_json::from_str("\"satellite\"").unwrap();
        assert_eq!(nt, NetworkType::Unknown);
    }
}
