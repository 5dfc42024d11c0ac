//! Scenario files
//!
//! A scenario is a TOML script of timed frames for one or more clients:
//!
//! ```toml
//! client = "phone-1"
//!
//! [config]
//! hysteresis = 10
//!
//! [[frame]]
//! at_secs = 0
//! route = "/listing/42"
//! [frame.metrics]
//! battery = 80.0
//! batteryCharging = true
//! cpuScore = 75.0
//! fps = 55.0
//! online = true
//!
//! [[frame]]
//! at_secs = 20
//! consent = "always-optimize"
//! ```
//!
//! Within a frame the actions run in a fixed order: identify, override,
//! debug metrics, telemetry, consent, disconnect.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::Path;

use tiering::{EngineConfig, MetricsSnapshot};

/// Client used when neither the scenario nor a frame names one
pub const DEFAULT_CLIENT: &str = "replay-client";

/// A parsed scenario
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Default client for frames that do not name one
    #[serde(default = "default_client")]
    pub client: String,

    /// Wall-clock time of `at_secs = 0`
    #[serde(default = "default_start")]
    pub start: DateTime<Utc>,

    /// Engine tunables; missing keys keep their defaults
    #[serde(default)]
    pub config: EngineConfig,

    #[serde(default, rename = "frame")]
    pub frames: Vec<Frame>,
}

/// One timed step of a scenario
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Frame {
    /// Seconds since scenario start
    pub at_secs: u64,

    pub client: Option<String>,

    pub route: Option<String>,

    /// Telemetry to ingest
    pub metrics: Option<MetricsSnapshot>,

    /// Re-identify the client before anything else
    #[serde(default)]
    pub identify: bool,

    /// Tier to force, or "auto" to clear
    #[serde(rename = "override")]
    pub override_tier: Option<String>,

    /// Forced metrics snapshot
    pub debug_metrics: Option<MetricsSnapshot>,

    /// Release forced metrics
    #[serde(default)]
    pub clear_debug_metrics: bool,

    /// Consent answer recorded after the telemetry
    pub consent: Option<String>,

    /// Disconnect the client at the end of the frame
    #[serde(default)]
    pub disconnect: bool,
}

fn default_client() -> String {
    DEFAULT_CLIENT.to_string()
}

fn default_start() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

impl Frame {
    /// Client this frame addresses
    pub fn client<'a>(&'a self, scenario: &'a Scenario) -> &'a str {
        self.client.as_deref().unwrap_or(&scenario.client)
    }
}

impl Scenario {
    /// Parse and check a scenario
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(s).context("parsing scenario")?;
        scenario.check()?;
        Ok(scenario)
    }

    /// Load a scenario file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("loading {}", path.display()))
    }

    fn check(&self) -> Result<()> {
        if self.frames.is_empty() {
            bail!("scenario has no frames");
        }
        for pair in self.frames.windows(2) {
            if pair[1].at_secs < pair[0].at_secs {
                bail!(
                    "frames out of order: at_secs {} follows {}",
                    pair[1].at_secs,
                    pair[0].at_secs
                );
            }
        }
        Ok(())
    }

    /// Wall-clock time of a frame
    pub fn time_of(&self, frame: &Frame) -> DateTime<Utc> {
        self.start + chrono::Duration::seconds(frame.at_secs as i64)
    }
}
