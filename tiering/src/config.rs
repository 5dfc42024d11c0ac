//! Engine configuration
//!
//! Defaults come from [`EngineConfig::default`]. Either `TIER_*` environment
//! variables or a TOML file override them; CLI flags in the binary override
//! both.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::consumption::DEFAULT_WINDOW;
use crate::metrics::DEFAULT_HIDDEN_FPS_FALLBACK;

/// Tunables for the tier engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum dwell between non-emergency tier switches
    #[serde(with = "secs")]
    pub hysteresis: Duration,

    /// Grace period before a disconnected client's state is purged
    #[serde(with = "secs")]
    pub eviction_grace: Duration,

    /// Minimum spacing of observer snapshots during stable periods
    #[serde(with = "secs")]
    pub observer_interval: Duration,

    /// Battery readings kept per client
    pub consumption_window: usize,

    /// Fps substituted for a hidden or unmeasured page
    pub hidden_fps_fallback: f64,

    /// Broadcast channel capacity for decision events
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hysteresis: Duration::from_secs(10),
            eviction_grace: Duration::from_secs(60),
            observer_interval: Duration::from_secs(5),
            consumption_window: DEFAULT_WINDOW,
            hidden_fps_fallback: DEFAULT_HIDDEN_FPS_FALLBACK,
            event_channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("TIER_HYSTERESIS_SECS") {
            config.hysteresis = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("TIER_EVICTION_GRACE_SECS") {
            config.eviction_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("TIER_OBSERVER_INTERVAL_SECS") {
            config.observer_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("TIER_CONSUMPTION_WINDOW") {
            config.consumption_window = n;
        }
        if let Some(fps) = env_parse::<f64>("TIER_HIDDEN_FPS_FALLBACK") {
            config.hidden_fps_fallback = fps;
        }
        if let Some(n) = env_parse::<usize>("TIER_EVENT_CAPACITY") {
            config.event_channel_capacity = n;
        }

        config
    }

    /// Parse a TOML config; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
