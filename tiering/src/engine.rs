//! Tier engine facade
//!
//! Owns the session registry, the decision policy and the event bus.
//! Every operation for one client runs under that client's lock, so
//! request/response calls and streamed telemetry never interleave for the
//! same client while different clients proceed in parallel.
//!
//! Decisions are computed on a working copy of the client's state and
//! committed only if computation succeeds; a panic inside the policy is
//! reported as [`TierError::Internal`] and leaves the client untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::config::EngineConfig;
use crate::consent::Consent;
use crate::consumption::ConsumptionAnalysis;
use crate::decision::Decision;
use crate::error::{TierError, TierResult};
use crate::events::{EventBus, SharedEventBus, TierEvent};
use crate::metrics::{MetricsSnapshot, TelemetryMessage};
use crate::policy::{SampleMode, TierPolicy};
use crate::session::ClientContext;
use crate::store::{SessionStore, SharedSessionStore};
use crate::tier::Tier;

/// Shared reference to TierEngine
pub type SharedTierEngine = Arc<TierEngine>;

/// Read-only view of one client's state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub client_id: String,
    pub current_tier: Option<Tier>,
    pub last_switch: Option<DateTime<Utc>>,
    pub manual_override: Option<Tier>,
    pub consent: Option<Consent>,
    pub consumption: ConsumptionAnalysis,
    pub consumption_samples: usize,
    pub routes: Vec<RouteStatus>,
    pub last_route: Option<String>,
    pub debug_metrics_active: bool,
    pub eviction_pending: bool,
}

/// One route-memory record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    pub route: String,
    pub tier: Tier,
    pub locked_at: DateTime<Utc>,
}

/// Parse an override request: `None`, `"auto"` and `"null"` clear it
fn parse_override(raw: Option<&str>) -> TierResult<Option<Tier>> {
    match raw.map(str::trim) {
        None => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("auto") || s.eq_ignore_ascii_case("null") => Ok(None),
        Some(s) => s.parse().map(Some),
    }
}

/// Per-client tier decision engine
pub struct TierEngine {
    config: EngineConfig,
    store: SharedSessionStore,
    policy: TierPolicy,
    events: SharedEventBus,
    clock: SharedClock,
}

impl TierEngine {
    /// Create an engine on the system clock
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine on a caller-supplied clock
    pub fn with_clock(config: EngineConfig, clock: SharedClock) -> Self {
        let store = SessionStore::new(config.consumption_window, config.eviction_grace).shared();
        let events = EventBus::with_capacity(config.event_channel_capacity).shared();
        let policy = TierPolicy::new(&config);
        info!(
            hysteresis_secs = config.hysteresis.as_secs(),
            eviction_grace_secs = config.eviction_grace.as_secs(),
            consumption_window = config.consumption_window,
            "Tier engine initialized"
        );
        Self {
            config,
            store,
            policy,
            events,
            clock,
        }
    }

    /// Create a shared reference to this engine
    pub fn shared(self) -> SharedTierEngine {
        Arc::new(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Event bus carrying decision pushes and observer snapshots
    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn client_count(&self) -> usize {
        self.store.len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.store.client_ids()
    }

    /// (Re)identification: cancel any pending purge and drop the committed
    /// tier and route memory so the next frame is a first connection.
    /// Returns true if the session was created by this call.
    pub async fn identify(&self, client_id: &str) -> TierResult<bool> {
        let client_id = require_client_id(client_id)?;
        self.store.cancel_purge(client_id);
        let (slot, created) = self.store.upsert(client_id);
        slot.lock().await.reset();
        info!(client_id, created, "Client identified");
        self.events.publish(TierEvent::SessionReset {
            client_id: client_id.to_string(),
            timestamp: self.clock.now(),
        });
        Ok(created)
    }

    /// Schedule the client's state for purge after the eviction grace
    /// period. Must be called from within a Tokio runtime.
    pub fn disconnect(&self, client_id: &str) -> TierResult<()> {
        let client_id = require_client_id(client_id)?;
        if self.store.get(client_id).is_none() {
            return Err(TierError::UnknownClient(client_id.to_string()));
        }
        let events = Arc::clone(&self.events);
        let clock = Arc::clone(&self.clock);
        self.store.schedule_purge(client_id, move |id| {
            events.publish(TierEvent::SessionEvicted {
                client_id: id.to_string(),
                timestamp: clock.now(),
            });
        });
        info!(
            client_id,
            grace_secs = self.config.eviction_grace.as_secs(),
            "Client disconnected"
        );
        Ok(())
    }

    /// Process one telemetry frame and return the resulting decision
    pub async fn ingest(&self, mut message: TelemetryMessage) -> TierResult<Decision> {
        message.validate()?;

        let (slot, _) = self.store.upsert(&message.client_id);
        let mut ctx = slot.lock().await;

        let metrics = ctx
            .debug_metrics
            .clone()
            .unwrap_or_else(|| message.metrics.clone());
        let now = self.clock.now();
        let previous = ctx.last_delivered_tier;

        let decision = self.compute(
            &mut ctx,
            &metrics,
            &message.route,
            message.timestamp,
            now,
            SampleMode::Record,
        )?;

        let route = message.route.clone();
        ctx.last_telemetry = Some(message);
        self.deliver(&mut ctx, &route, &metrics, previous, &decision, now, false);
        Ok(decision)
    }

    /// Ingest frames in receive order until the sender closes.
    /// Rejected frames are logged and skipped. Returns the number of frames
    /// that produced a decision.
    pub async fn run_stream(&self, mut frames: mpsc::Receiver<TelemetryMessage>) -> usize {
        let mut processed = 0;
        while let Some(frame) = frames.recv().await {
            let client_id = frame.client_id.clone();
            match self.ingest(frame).await {
                Ok(_) => processed += 1,
                Err(e) => warn!(client_id, code = e.code(), "Telemetry frame rejected: {}", e),
            }
        }
        debug!(processed, "Telemetry stream closed");
        processed
    }

    /// Record a consent answer. An answer that permits optimization
    /// triggers an immediate recompute from the last known metrics.
    pub async fn record_consent(
        &self,
        client_id: &str,
        consent: &str,
    ) -> TierResult<Option<Decision>> {
        let client_id = require_client_id(client_id)?;
        let consent: Consent = consent.parse()?;
        let slot = self
            .store
            .get(client_id)
            .ok_or_else(|| TierError::UnknownClient(client_id.to_string()))?;
        let mut ctx = slot.lock().await;

        ctx.consent.record(consent);
        info!(client_id, consent = %consent, "Consent recorded");
        let now = self.clock.now();
        self.events.publish(TierEvent::ConsentRecorded {
            client_id: client_id.to_string(),
            consent,
            timestamp: now,
        });

        if !consent.authorizes_downgrade() {
            return Ok(None);
        }
        let decision = self.recompute(&mut ctx, now)?;
        ctx.consent.clear_one_shot();
        Ok(decision)
    }

    /// Set (`Some("A".."D")`) or clear (`None`, `"auto"`) the manual override.
    /// Returns the recomputed decision when metrics are known.
    pub async fn set_override(
        &self,
        client_id: &str,
        tier: Option<&str>,
    ) -> TierResult<Option<Decision>> {
        let client_id = require_client_id(client_id)?;
        let tier = parse_override(tier)?;

        let slot = match (tier, self.store.get(client_id)) {
            (_, Some(slot)) => slot,
            (Some(_), None) => self.store.upsert(client_id).0,
            (None, None) => return Err(TierError::UnknownClient(client_id.to_string())),
        };
        let mut ctx = slot.lock().await;

        match tier {
            Some(t) => {
                ctx.set_override(t);
                info!(client_id, tier = %t, "Manual override set");
            }
            None => {
                ctx.clear_override();
                info!(client_id, "Manual override cleared");
            }
        }
        let now = self.clock.now();
        self.events.publish(TierEvent::OverrideChanged {
            client_id: client_id.to_string(),
            tier,
            timestamp: now,
        });

        self.recompute(&mut ctx, now)
    }

    /// Force (`Some`) or release (`None`) a metrics snapshot that replaces
    /// incoming telemetry. Forcing produces an immediate decision.
    pub async fn set_debug_metrics(
        &self,
        client_id: &str,
        metrics: Option<MetricsSnapshot>,
    ) -> TierResult<Option<Decision>> {
        let client_id = require_client_id(client_id)?;
        if let Some(ref m) = metrics {
            m.validate()?;
        }
        let (slot, _) = self.store.upsert(client_id);
        let mut ctx = slot.lock().await;
        let now = self.clock.now();

        let active = metrics.is_some();
        ctx.debug_metrics = metrics;
        warn!(client_id, active, "Debug metrics override changed");
        self.events.publish(TierEvent::DebugMetricsChanged {
            client_id: client_id.to_string(),
            active,
            timestamp: now,
        });

        let Some(forced) = ctx.debug_metrics.clone() else {
            return Ok(None);
        };
        let route = last_route(&ctx);
        let previous = ctx.last_delivered_tier;
        let decision = self.compute(&mut ctx, &forced, &route, now, now, SampleMode::Record)?;
        self.deliver(&mut ctx, &route, &forced, previous, &decision, now, true);
        Ok(Some(decision))
    }

    /// Drop the committed tier and route memory. Returns false for an
    /// unknown client.
    pub async fn reset(&self, client_id: &str) -> bool {
        if !self.store.reset(client_id).await {
            return false;
        }
        self.events.publish(TierEvent::SessionReset {
            client_id: client_id.to_string(),
            timestamp: self.clock.now(),
        });
        true
    }

    /// Snapshot of one client's state
    pub async fn status(&self, client_id: &str) -> Option<ClientStatus> {
        let slot = self.store.get(client_id)?;
        let ctx = slot.lock().await;
        Some(ClientStatus {
            client_id: ctx.client_id().to_string(),
            current_tier: ctx.session.current_tier,
            last_switch: ctx.session.last_switch,
            manual_override: ctx.session.manual_override,
            consent: ctx.consent.get(),
            consumption: ctx.consumption.consumption_rate(),
            consumption_samples: ctx.consumption.len(),
            routes: ctx
                .routes
                .records()
                .into_iter()
                .map(|(route, record)| RouteStatus {
                    route,
                    tier: record.tier,
                    locked_at: record.timestamp,
                })
                .collect(),
            last_route: ctx.last_telemetry.as_ref().map(|t| t.route.clone()),
            debug_metrics_active: ctx.debug_metrics.is_some(),
            eviction_pending: self.store.purge_pending(client_id),
        })
    }

    /// Re-run the policy from the client's last known metrics without
    /// recording a new battery sample, and push the result.
    fn recompute(&self, ctx: &mut ClientContext, now: DateTime<Utc>) -> TierResult<Option<Decision>> {
        let (metrics, observed_at) = match (&ctx.debug_metrics, &ctx.last_telemetry) {
            (Some(forced), _) => (forced.clone(), now),
            (None, Some(last)) => (last.metrics.clone(), last.timestamp),
            (None, None) => {
                debug!(client_id = ctx.client_id(), "No metrics yet, skipping recompute");
                return Ok(None);
            }
        };
        let route = last_route(ctx);
        let previous = ctx.last_delivered_tier;
        let decision = self.compute(ctx, &metrics, &route, observed_at, now, SampleMode::Skip)?;
        self.deliver(ctx, &route, &metrics, previous, &decision, now, true);
        Ok(Some(decision))
    }

    /// Run the policy on a working copy and commit it only on success
    fn compute(
        &self,
        ctx: &mut ClientContext,
        metrics: &MetricsSnapshot,
        route: &str,
        observed_at: DateTime<Utc>,
        now: DateTime<Utc>,
        mode: SampleMode,
    ) -> TierResult<Decision> {
        let mut working = ctx.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.policy
                .decide_tier(&mut working, metrics, route, observed_at, now, mode)
        }));

        match outcome {
            Ok(decision) => {
                *ctx = working;
                debug!(
                    client_id = ctx.client_id(),
                    route,
                    tier = %decision.tier,
                    confidence = decision.confidence,
                    reason = %decision.reason,
                    "Decision computed"
                );
                Ok(decision)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(client_id = ctx.client_id(), route, %detail, "Tier computation failed");
                Err(TierError::Internal(detail))
            }
        }
    }

    /// Push the decision to the client, or emit a throttled observer
    /// snapshot when nothing changed. `previous` is the tier last delivered
    /// to the client, not the committed tier.
    #[allow(clippy::too_many_arguments)]
    fn deliver(
        &self,
        ctx: &mut ClientContext,
        route: &str,
        metrics: &MetricsSnapshot,
        previous: Option<Tier>,
        decision: &Decision,
        now: DateTime<Utc>,
        force: bool,
    ) {
        let client_id = ctx.client_id().to_string();
        ctx.last_delivered_tier = Some(decision.tier);

        if force || must_push(previous, decision) {
            self.events.publish(TierEvent::DecisionPushed {
                event_id: TierEvent::new_id(),
                client_id,
                route: route.to_string(),
                decision: decision.clone(),
                timestamp: now,
            });
            return;
        }

        let interval = chrono::Duration::from_std(self.config.observer_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        let due = ctx
            .last_observer_emit
            .map_or(true, |last| now - last >= interval);
        if due {
            ctx.last_observer_emit = Some(now);
            self.events.publish(TierEvent::ObserverSnapshot {
                client_id,
                route: route.to_string(),
                decision: decision.clone(),
                metrics: metrics.clone(),
                timestamp: now,
            });
        }
    }
}

/// Whether a decision has to reach the client
fn must_push(previous: Option<Tier>, decision: &Decision) -> bool {
    previous != Some(decision.tier)
        || decision.requires_consent
        || decision.emergency
        || decision.is_override
        || decision.is_first_connection
}

fn require_client_id(client_id: &str) -> TierResult<&str> {
    let trimmed = client_id.trim();
    if trimmed.is_empty() {
        return Err(TierError::MissingClientId);
    }
    Ok(trimmed)
}

fn last_route(ctx: &ClientContext) -> String {
    ctx.last_telemetry
        .as_ref()
        .map(|t| t.route.clone())
        .unwrap_or_else(|| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::events::{EventBusExt, EventFilter};
    use crate::metrics::NetworkType;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> (TierEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = TierEngine::with_clock(EngineConfig::default(), clock.clone());
        (engine, clock)
    }

    fn good_metrics() -> MetricsSnapshot {
        MetricsSnapshot {
            battery: 80.0,
            battery_charging: true,
            network_type: NetworkType::Wifi,
            network_downlink: 50.0,
            cpu_score: 85.0,
            fps: Some(58.0),
            memory_total: 8192.0,
            memory_used: 1024.0,
            online: true,
        }
    }

    fn frame(client: &str, metrics: MetricsSnapshot, at: DateTime<Utc>) -> TelemetryMessage {
        TelemetryMessage::new(client, "/", metrics, at)
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(parse_override(None).unwrap(), None);
        assert_eq!(parse_override(Some("AUTO")).unwrap(), None);
        assert_eq!(parse_override(Some("null")).unwrap(), None);
        assert_eq!(parse_override(Some("c")).unwrap(), Some(Tier::C));
        assert!(matches!(
            parse_override(Some("Z")),
            Err(TierError::UnknownTier(_))
        ));
    }

    #[test]
    fn test_must_push_rules() {
        let now = t0();
        let stable = Decision::new(Tier::B, "stable", 80, now);
        assert!(!must_push(Some(Tier::B), &stable));
        assert!(must_push(Some(Tier::A), &stable));
        assert!(must_push(None, &stable));

        let mut consent = stable.clone();
        consent.requires_consent = true;
        assert!(must_push(Some(Tier::B), &consent));
    }

    #[tokio::test]
    async fn test_ingest_rejects_missing_client_without_state() {
        let (engine, _) = engine();
        let err = engine.ingest(frame("  ", good_metrics(), t0())).await.unwrap_err();
        assert_eq!(err, TierError::MissingClientId);
        assert_eq!(engine.client_count(), 0);
    }

    #[tokio::test]
    async fn test_first_ingest_pushes_decision() {
        let (engine, _) = engine();
        let mut push = engine
            .events()
            .subscribe_filtered(EventFilter::push_channel("c1"));

        let d = engine.ingest(frame("c1", good_metrics(), t0())).await.unwrap();
        assert_eq!(d.tier, Tier::A);
        assert!(d.is_first_connection);

        let event = push.try_recv().unwrap();
        assert_eq!(event.decision().map(|d| d.tier), Some(Tier::A));
    }

    #[tokio::test]
    async fn test_stable_frames_go_to_observers_throttled() {
        let (engine, clock) = engine();
        engine.ingest(frame("c1", good_metrics(), t0())).await.unwrap();

        let mut push = engine
            .events()
            .subscribe_filtered(EventFilter::push_channel("c1"));
        let mut observer = engine
            .events()
            .subscribe_filtered(EventFilter::new().types(vec!["observer_snapshot"]));

        for _ in 0..3 {
            clock.advance(chrono::Duration::seconds(2));
            let at = clock.now();
            engine.ingest(frame("c1", good_metrics(), at)).await.unwrap();
        }

        assert!(push.try_recv().is_err(), "stable tier is not pushed");
        assert!(observer.try_recv().is_ok());
        // frames at +2s, +4s, +6s: only +2s falls outside the 5s interval
        assert!(observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_consent_unknown_client() {
        let (engine, _) = engine();
        let err = engine.record_consent("ghost", "accept").await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_CLIENT");
    }

    #[tokio::test]
    async fn test_override_roundtrip() {
        let (engine, clock) = engine();
        engine.ingest(frame("c1", good_metrics(), t0())).await.unwrap();

        clock.advance(chrono::Duration::seconds(1));
        let d = engine.set_override("c1", Some("d")).await.unwrap().unwrap();
        assert_eq!(d.tier, Tier::D);
        assert!(d.is_override);

        let status = engine.status("c1").await.unwrap();
        assert_eq!(status.manual_override, Some(Tier::D));
        assert_eq!(status.current_tier, Some(Tier::A));

        let d = engine.set_override("c1", Some("auto")).await.unwrap().unwrap();
        assert!(!d.is_override);
        assert_eq!(d.tier, Tier::A);
    }

    #[tokio::test]
    async fn test_override_rejects_unknown_tier() {
        let (engine, _) = engine();
        engine.ingest(frame("c1", good_metrics(), t0())).await.unwrap();
        let err = engine.set_override("c1", Some("E")).await.unwrap_err();
        assert_eq!(err, TierError::UnknownTier("E".to_string()));
        assert_eq!(engine.status("c1").await.unwrap().manual_override, None);
    }

    #[tokio::test]
    async fn test_debug_metrics_replace_telemetry() {
        let (engine, clock) = engine();
        engine.ingest(frame("c1", good_metrics(), t0())).await.unwrap();

        let mut forced = good_metrics();
        forced.online = false;
        let d = engine
            .set_debug_metrics("c1", Some(forced))
            .await
            .unwrap()
            .unwrap();
        assert!(d.emergency);

        clock.advance(chrono::Duration::seconds(30));
        let d = engine
            .ingest(frame("c1", good_metrics(), clock.now()))
            .await
            .unwrap();
        assert_eq!(d.tier, Tier::D, "forced offline snapshot still applies");

        assert!(engine.set_debug_metrics("c1", None).await.unwrap().is_none());
        assert!(!engine.status("c1").await.unwrap().debug_metrics_active);
    }

    #[tokio::test]
    async fn test_identify_resets_committed_tier() {
        let (engine, clock) = engine();
        engine.ingest(frame("c1", good_metrics(), t0())).await.unwrap();
        assert!(!engine.identify("c1").await.unwrap());

        let status = engine.status("c1").await.unwrap();
        assert_eq!(status.current_tier, None);
        assert!(status.routes.is_empty());

        clock.advance(chrono::Duration::seconds(1));
        let d = engine
            .ingest(frame("c1", good_metrics(), clock.now()))
            .await
            .unwrap();
        assert!(d.is_first_connection);
    }

    #[tokio::test]
    async fn test_run_stream_processes_in_order() {
        let (engine, _) = engine();
        let (tx, rx) = mpsc::channel(8);
        tx.send(frame("c1", good_metrics(), t0())).await.unwrap();
        tx.send(frame("", good_metrics(), t0())).await.unwrap();
        tx.send(frame("c2", good_metrics(), t0())).await.unwrap();
        drop(tx);

        assert_eq!(engine.run_stream(rx).await, 2);
        assert_eq!(engine.client_ids(), vec!["c1".to_string(), "c2".to_string()]);
    }
}
