//! Decision property tests: pseudo-random telemetry sequences checked
//! against the engine's invariants.
//!
//! Tests verify:
//! - Every decision carries a valid tier with matching constraints
//! - Stable good metrics produce no switch
//! - No automatic tier change lands inside the hysteresis window
//! - Route records never lose rank
//! - Emergency conditions always force tier D

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tiering::{
    Clock, EngineConfig, ManualClock, MetricsSnapshot, NetworkType, TelemetryMessage, Tier,
    TierEngine,
};

/// Deterministic xorshift generator so failures reproduce.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next() % (hi - lo)
    }

    fn chance(&mut self, percent: u64) -> bool {
        self.range(0, 100) < percent
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap()
}

fn engine() -> (TierEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    (
        TierEngine::with_clock(EngineConfig::default(), clock.clone()),
        clock,
    )
}

fn good_metrics() -> MetricsSnapshot {
    MetricsSnapshot {
        battery: 90.0,
        battery_charging: true,
        network_type: NetworkType::Wifi,
        network_downlink: 40.0,
        cpu_score: 90.0,
        fps: Some(60.0),
        memory_total: 16384.0,
        memory_used: 4096.0,
        online: true,
    }
}

fn random_metrics(rng: &mut Rng) -> MetricsSnapshot {
    let fps = match rng.range(0, 20) {
        0 => None,
        1 => Some(0.0),
        _ => Some(rng.range(1, 70) as f64),
    };
    MetricsSnapshot {
        battery: rng.range(0, 101) as f64,
        battery_charging: rng.chance(30),
        network_type: NetworkType::Cellular4g,
        network_downlink: rng.range(0, 50) as f64,
        cpu_score: rng.range(0, 101) as f64,
        fps,
        memory_total: 8192.0,
        memory_used: rng.range(0, 8192) as f64,
        online: rng.chance(92),
    }
}

const ROUTES: [&str; 4] = ["/", "/search", "/listing/42", "/inbox"];

// ── Property: tier always valid, constraints consistent ────────────

#[tokio::test]
async fn prop_tier_always_valid() {
    let (engine, clock) = engine();
    let mut rng = Rng(0x5eed_0001);

    for i in 0..400 {
        clock.advance(Duration::seconds(rng.range(1, 15) as i64));
        let client = format!("client-{}", i % 5);
        let route = ROUTES[rng.range(0, 4) as usize];
        let message = TelemetryMessage::new(client, route, random_metrics(&mut rng), clock.now());

        let decision = engine.ingest(message).await.unwrap();
        assert!(Tier::all().contains(&decision.tier));
        assert_eq!(decision.constraints, decision.tier.constraints());
        assert!(decision.confidence <= 100);
    }
}

// ── Property: stable good metrics do not switch ────────────────────

#[tokio::test]
async fn prop_stable_metrics_do_not_switch() {
    let (engine, clock) = engine();

    let first = engine
        .ingest(TelemetryMessage::new("c1", "/", good_metrics(), clock.now()))
        .await
        .unwrap();
    assert_eq!(first.tier, Tier::A);

    for _ in 0..5 {
        clock.advance(Duration::seconds(11));
        let d = engine
            .ingest(TelemetryMessage::new("c1", "/", good_metrics(), clock.now()))
            .await
            .unwrap();
        assert_eq!(d.tier, Tier::A);
        assert!(!d.auto_switch);
        assert_eq!(d.reason, "stable");
    }
}

// ── Property: hysteresis holds for automatic changes ───────────────

#[tokio::test]
async fn prop_no_automatic_change_inside_hysteresis() {
    let (engine, clock) = engine();
    let mut rng = Rng(0x5eed_0002);

    for _ in 0..500 {
        clock.advance(Duration::seconds(rng.range(1, 8) as i64));
        let before = engine.status("c1").await;
        let message =
            TelemetryMessage::new("c1", "/", random_metrics(&mut rng), clock.now());
        let decision = engine.ingest(message).await.unwrap();
        let after = engine.status("c1").await.unwrap();

        let Some(before) = before else { continue };
        if before.current_tier == after.current_tier
            || decision.emergency
            || decision.is_first_connection
        {
            continue;
        }
        let last = before.last_switch.expect("committed tier has a switch time");
        assert!(
            clock.now() - last >= Duration::seconds(10),
            "tier changed {:?} -> {:?} after {}s: {}",
            before.current_tier,
            after.current_tier,
            (clock.now() - last).num_seconds(),
            decision.reason
        );
    }
}

// ── Property: route records never lose rank ────────────────────────

#[tokio::test]
async fn prop_route_records_monotonic() {
    let (engine, clock) = engine();
    let mut rng = Rng(0x5eed_0003);
    let mut seen: HashMap<String, Tier> = HashMap::new();

    for _ in 0..400 {
        clock.advance(Duration::seconds(rng.range(1, 20) as i64));
        let route = ROUTES[rng.range(0, 4) as usize];
        let message = TelemetryMessage::new("c1", route, random_metrics(&mut rng), clock.now());
        engine.ingest(message).await.unwrap();

        for record in engine.status("c1").await.unwrap().routes {
            if let Some(previous) = seen.get(&record.route) {
                assert!(
                    record.tier >= *previous,
                    "route {} dropped from {} to {}",
                    record.route,
                    previous,
                    record.tier
                );
            }
            seen.insert(record.route, record.tier);
        }
    }
}

// ── Property: emergency dominance ──────────────────────────────────

#[tokio::test]
async fn prop_emergency_forces_d() {
    let (engine, clock) = engine();
    let mut rng = Rng(0x5eed_0004);

    for i in 0..120 {
        // warm the client into an arbitrary state first
        clock.advance(Duration::seconds(rng.range(1, 15) as i64));
        let warmup = TelemetryMessage::new("c1", "/", random_metrics(&mut rng), clock.now());
        engine.ingest(warmup).await.unwrap();

        let mut metrics = random_metrics(&mut rng);
        metrics.online = true;
        match i % 3 {
            0 => metrics.online = false,
            1 => metrics.battery = rng.range(0, 5) as f64,
            _ => metrics.fps = Some(rng.range(1, 5) as f64),
        }

        clock.advance(Duration::seconds(1));
        let d = engine
            .ingest(TelemetryMessage::new("c1", "/", metrics, clock.now()))
            .await
            .unwrap();
        assert_eq!(d.tier, Tier::D, "case {}: {}", i, d.reason);
        assert!(d.emergency);
        assert_eq!(d.confidence, 100);
    }
}
