//! Offline replay of scripted telemetry through the tier engine
//!
//! Runs a [`Scenario`] on a manual clock so hysteresis and drain-rate math
//! see scenario time rather than wall time, and records every decision the
//! engine returns.

pub mod scenario;

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use tiering::{
    Clock, Decision, ManualClock, StructuredError, TelemetryMessage, TierEngine, TierResult,
};

pub use scenario::{Frame, Scenario, DEFAULT_CLIENT};

/// One line of replay output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRecord {
    pub at_secs: u64,
    pub client_id: String,
    /// `telemetry`, `override`, `debug-metrics`, `consent`, `identify` or `disconnect`
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
}

impl ReplayRecord {
    fn new(frame: &Frame, client_id: &str, action: &'static str) -> Self {
        Self {
            at_secs: frame.at_secs,
            client_id: client_id.to_string(),
            action,
            route: None,
            decision: None,
            error: None,
        }
    }

    fn outcome(mut self, result: TierResult<Option<Decision>>) -> Self {
        match result {
            Ok(decision) => self.decision = decision,
            Err(e) => self.error = Some(e.to_structured()),
        }
        self
    }
}

/// Replay a scenario and collect every engine response.
/// Engine errors are recorded, not returned; frames keep running.
pub async fn replay(scenario: &Scenario) -> Result<Vec<ReplayRecord>> {
    let clock = Arc::new(ManualClock::new(scenario.start));
    let engine = TierEngine::with_clock(scenario.config.clone(), clock.clone());
    let mut records = Vec::new();

    info!(
        frames = scenario.frames.len(),
        client = %scenario.client,
        "Replaying scenario"
    );

    for frame in &scenario.frames {
        let at = scenario.time_of(frame);
        clock.set(at);
        let client_id = frame.client(scenario);
        debug!(at_secs = frame.at_secs, client_id, "Frame");

        if frame.identify {
            if let Err(e) = engine.identify(client_id).await {
                records.push(ReplayRecord::new(frame, client_id, "identify").outcome(Err(e)));
            }
        }

        if let Some(ref tier) = frame.override_tier {
            let result = engine.set_override(client_id, Some(tier.as_str())).await;
            records.push(ReplayRecord::new(frame, client_id, "override").outcome(result));
        }

        if frame.clear_debug_metrics || frame.debug_metrics.is_some() {
            let result = engine
                .set_debug_metrics(client_id, frame.debug_metrics.clone())
                .await;
            records.push(ReplayRecord::new(frame, client_id, "debug-metrics").outcome(result));
        }

        if let Some(ref metrics) = frame.metrics {
            let route = frame.route.clone().unwrap_or_else(|| "/".to_string());
            let message = TelemetryMessage::new(client_id, route.clone(), metrics.clone(), clock.now());
            let result = engine.ingest(message).await.map(Some);
            let mut record = ReplayRecord::new(frame, client_id, "telemetry").outcome(result);
            record.route = Some(route);
            records.push(record);
        }

        if let Some(ref consent) = frame.consent {
            let result = engine.record_consent(client_id, consent).await;
            records.push(ReplayRecord::new(frame, client_id, "consent").outcome(result));
        }

        if frame.disconnect {
            if let Err(e) = engine.disconnect(client_id) {
                records.push(ReplayRecord::new(frame, client_id, "disconnect").outcome(Err(e)));
            }
        }
    }

    info!(records = records.len(), clients = engine.client_count(), "Replay finished");
    Ok(records)
}

/// Render records as JSON lines
pub fn to_json_lines(records: &[ReplayRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
