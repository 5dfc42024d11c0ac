//! Tier Policy: the per-client tier state machine
//!
//! Turns one telemetry frame plus the client's accumulated state into a
//! [`Decision`]. All decisions are deterministic rule tables; nothing is
//! learned.
//!
//! # Evaluation order
//!
//! ```text
//! manual override ──▶ return override (no sample recorded)
//!      │
//! record battery sample, analyze drain
//!      │
//! emergency? ───────▶ commit D (bypasses hysteresis, consent, route gate)
//!      │
//! first connection? ▶ optimistic tier from fps/battery/online, commit
//!      │
//! within hysteresis ▶ hold current tier (skipSwitch)
//!      │
//! performance tier × consumption tier
//!      │   richer than current  → upgrade now
//!      │   poorer, fps collapsed → downgrade now
//!      │   poorer, battery only  → consent ledger decides
//!      ▼
//! route memory gate ▶ final decision
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::consent::Consent;
use crate::consumption::ConsumptionAnalysis;
use crate::decision::{Decision, Direction, Trigger};
use crate::emergency::EmergencyDetector;
use crate::metrics::MetricsSnapshot;
use crate::session::ClientContext;
use crate::tier::Tier;

/// Measured fps below which a performance-driven downgrade applies at once.
/// Compared before hidden-tab normalization; a missing reading counts as below.
pub const PERFORMANCE_DOWNGRADE_FPS: f64 = 25.0;

/// Minutes of battery left below which the consumption tier is C
pub const LOW_RUNTIME_MINUTES: i64 = 60;
/// Minutes of battery left below which the consumption tier is D
pub const CRITICAL_RUNTIME_MINUTES: i64 = 30;

/// Whether the incoming frame should be added to the battery window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Regular telemetry
    Record,
    /// Recomputation from already-recorded metrics (consent, override clear)
    Skip,
}

/// Deterministic tier decision function
#[derive(Debug, Clone)]
pub struct TierPolicy {
    hysteresis: chrono::Duration,
    hidden_fps_fallback: f64,
    emergency: EmergencyDetector,
}

impl TierPolicy {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            hysteresis: chrono::Duration::from_std(config.hysteresis)
                .unwrap_or_else(|_| chrono::Duration::seconds(10)),
            hidden_fps_fallback: config.hidden_fps_fallback,
            emergency: EmergencyDetector::new(config.hidden_fps_fallback),
        }
    }

    /// Compute the next decision for a client and commit any tier change
    /// into `ctx`.
    ///
    /// `observed_at` timestamps the battery sample; `now` drives hysteresis.
    pub fn decide_tier(
        &self,
        ctx: &mut ClientContext,
        metrics: &MetricsSnapshot,
        route: &str,
        observed_at: DateTime<Utc>,
        now: DateTime<Utc>,
        mode: SampleMode,
    ) -> Decision {
        if let Some(forced) = ctx.session.manual_override {
            let mut decision = Decision::new(forced, "manual override", 100, now);
            decision.is_override = true;
            decision.auto_switch = true;
            return decision;
        }

        if mode == SampleMode::Record {
            ctx.consumption
                .add_reading(metrics.battery, metrics.battery_charging, observed_at);
        }
        let consumption = ctx.consumption.consumption_rate();

        let is_new = ctx.session.is_new();
        let previous = ctx.session.current_tier;

        let causes = self.emergency.causes(metrics, &consumption);
        if !causes.is_empty() {
            let mut decision = self.emergency.decision(&causes, now);
            decision.is_first_connection = is_new;
            if previous.is_some_and(|p| p > Tier::D) {
                decision.direction = Some(Direction::Downgrade);
            }
            decision.consumption = Some(consumption);
            ctx.session.commit(Tier::D, now);
            info!(
                client_id = ctx.client_id(),
                route,
                reason = %decision.reason,
                "Emergency tier forced"
            );
            return ctx.routes.apply(route, decision);
        }

        let current = match previous {
            Some(tier) if !is_new => tier,
            _ => {
                let decision = self.first_connection(metrics, &consumption, now);
                ctx.session.commit(decision.tier, now);
                debug!(
                    client_id = ctx.client_id(),
                    tier = %decision.tier,
                    "First connection tier committed"
                );
                return ctx.routes.apply(route, decision);
            }
        };

        if let Some(elapsed) = ctx.session.time_since_switch(now) {
            if elapsed < self.hysteresis {
                let mut decision = Decision::new(
                    current,
                    format!(
                        "holding tier {}: last switch {}ms ago",
                        current,
                        elapsed.num_milliseconds()
                    ),
                    100,
                    now,
                );
                decision.skip_switch = true;
                return decision;
            }
        }

        let decision = self.merge(ctx, current, metrics, &consumption, now);
        ctx.routes.apply(route, decision)
    }

    /// Optimistic tier for a client with no committed history
    fn first_connection(
        &self,
        metrics: &MetricsSnapshot,
        consumption: &ConsumptionAnalysis,
        now: DateTime<Utc>,
    ) -> Decision {
        let fps = metrics.normalized_fps(self.hidden_fps_fallback);
        let charging = metrics.battery_charging || consumption.is_charging;

        let (tier, confidence) = if fps >= 40.0 && metrics.battery > 40.0 && charging {
            (Tier::A, 95)
        } else if fps >= 25.0 && metrics.battery > 30.0 && metrics.online {
            (Tier::B, 90)
        } else if metrics.online && fps >= 15.0 {
            (Tier::C, 85)
        } else {
            (Tier::D, 80)
        };

        let mut decision = Decision::new(tier, "first connection", confidence, now);
        decision.is_first_connection = true;
        decision.auto_switch = true;
        decision
    }

    /// Tier justified by rendering performance alone
    pub fn performance_tier(&self, metrics: &MetricsSnapshot) -> Tier {
        let fps = metrics.normalized_fps(self.hidden_fps_fallback);
        let cpu = metrics.cpu_score;
        if fps >= 45.0 && cpu >= 60.0 {
            Tier::A
        } else if fps >= 30.0 && cpu >= 40.0 {
            Tier::B
        } else if fps >= 15.0 && cpu >= 20.0 {
            Tier::C
        } else {
            Tier::D
        }
    }

    /// Tier justified by battery drain alone
    pub fn consumption_tier(consumption: &ConsumptionAnalysis) -> Tier {
        if consumption.is_charging {
            return Tier::A;
        }
        match consumption.minutes_remaining {
            _ if consumption.critical => Tier::D,
            Some(m) if m < CRITICAL_RUNTIME_MINUTES => Tier::D,
            Some(m) if m < LOW_RUNTIME_MINUTES => Tier::C,
            _ if consumption.trend.is_elevated() => Tier::B,
            _ => Tier::A,
        }
    }

    /// Eager upgrade, conservative downgrade
    fn merge(
        &self,
        ctx: &mut ClientContext,
        current: Tier,
        metrics: &MetricsSnapshot,
        consumption: &ConsumptionAnalysis,
        now: DateTime<Utc>,
    ) -> Decision {
        let performance = self.performance_tier(metrics);
        let battery = Self::consumption_tier(consumption);

        let best = performance.richest(battery);
        if best > current {
            let mut decision = Decision::new(
                best,
                format!(
                    "upgrade: performance {}, consumption {}",
                    performance, battery
                ),
                90,
                now,
            );
            decision.auto_switch = true;
            decision.direction = Some(Direction::Upgrade);
            ctx.session.commit(best, now);
            info!(client_id = ctx.client_id(), from = %current, to = %best, "Tier upgraded");
            return decision;
        }

        let worst = performance.poorest(battery);
        if worst < current {
            let performance_driven = performance <= battery;
            let collapsed = metrics
                .fps
                .map_or(true, |fps| fps < PERFORMANCE_DOWNGRADE_FPS);

            if performance_driven && collapsed {
                let measured = metrics
                    .fps
                    .map_or_else(|| "unmeasured".to_string(), |fps| format!("{:.0} fps", fps));
                let mut decision = Decision::new(
                    worst,
                    format!("downgrade: frame rate {}", measured),
                    95,
                    now,
                );
                decision.auto_switch = true;
                decision.direction = Some(Direction::Downgrade);
                decision.trigger = Some(Trigger::Performance);
                ctx.session.commit(worst, now);
                info!(client_id = ctx.client_id(), from = %current, to = %worst, "Tier downgraded (performance)");
                return decision;
            }

            if !performance_driven {
                return self.consumption_downgrade(ctx, current, worst, consumption, now);
            }
        }

        Decision::new(current, "stable", 80, now)
    }

    /// Battery-motivated downgrade, gated by the consent ledger
    fn consumption_downgrade(
        &self,
        ctx: &mut ClientContext,
        current: Tier,
        proposed: Tier,
        consumption: &ConsumptionAnalysis,
        now: DateTime<Utc>,
    ) -> Decision {
        match ctx.consent.take_for_request() {
            Some(consent @ (Consent::AlwaysOptimize | Consent::Accept)) => {
                let mut decision = Decision::new(
                    proposed,
                    format!(
                        "downgrade: battery {} drain with consent ({})",
                        consumption.trend, consent
                    ),
                    85,
                    now,
                );
                decision.auto_switch = true;
                decision.direction = Some(Direction::Downgrade);
                decision.trigger = Some(Trigger::BatteryConsent);
                decision.consumption = Some(*consumption);
                ctx.session.commit(proposed, now);
                info!(
                    client_id = ctx.client_id(),
                    from = %current,
                    to = %proposed,
                    consent = %consent,
                    "Tier downgraded (battery consent)"
                );
                decision
            }
            Some(consent @ (Consent::NeverOptimize | Consent::Deny)) => Decision::new(
                current,
                format!("battery optimization declined ({})", consent),
                100,
                now,
            ),
            None => {
                let mut decision = Decision::new(
                    current,
                    format!(
                        "battery {} drain suggests tier {}; awaiting consent",
                        consumption.trend, proposed
                    ),
                    75,
                    now,
                );
                decision.requires_consent = true;
                decision.suggested_tier = Some(proposed);
                decision.consumption = Some(*consumption);
                debug!(
                    client_id = ctx.client_id(),
                    suggested = %proposed,
                    "Consent required for battery downgrade"
                );
                decision
            }
        }
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}
