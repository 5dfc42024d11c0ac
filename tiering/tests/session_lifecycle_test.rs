//! Session lifecycle tests: identification, disconnect grace period,
//! eviction, overrides and error surfaces.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tiering::{
    Clock, EngineConfig, EventBusExt, EventFilter, ManualClock, MetricsSnapshot, NetworkType,
    TelemetryMessage, Tier, TierEngine, TierError, TierEvent,
};

fn engine() -> (TierEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 9, 12, 18, 30, 0).unwrap(),
    ));
    (
        TierEngine::with_clock(EngineConfig::default(), clock.clone()),
        clock,
    )
}

fn metrics() -> MetricsSnapshot {
    MetricsSnapshot {
        battery: 70.0,
        battery_charging: false,
        network_type: NetworkType::Cellular4g,
        network_downlink: 8.0,
        cpu_score: 65.0,
        fps: Some(55.0),
        memory_total: 4096.0,
        memory_used: 3000.0,
        online: true,
    }
}

fn frame(client: &str, clock: &ManualClock) -> TelemetryMessage {
    TelemetryMessage::new(client, "/", metrics(), clock.now())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_evicts_after_grace() {
    let (engine, clock) = engine();
    engine.ingest(frame("c1", &clock)).await.unwrap();
    let mut evictions = engine
        .events()
        .subscribe_filtered(EventFilter::new().types(vec!["session_evicted"]));

    engine.disconnect("c1").unwrap();
    assert!(engine.status("c1").await.unwrap().eviction_pending);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(engine.client_count(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.client_count(), 0);
    assert!(engine.status("c1").await.is_none());

    let event = evictions.recv().await.unwrap();
    assert!(matches!(event, TierEvent::SessionEvicted { ref client_id, .. } if client_id == "c1"));
}

#[tokio::test(start_paused = true)]
async fn test_reidentify_cancels_eviction() {
    let (engine, clock) = engine();
    engine.ingest(frame("c1", &clock)).await.unwrap();
    engine.set_override("c1", Some("C")).await.unwrap();

    engine.disconnect("c1").unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!engine.identify("c1").await.unwrap());

    tokio::time::sleep(Duration::from_secs(120)).await;
    let status = engine.status("c1").await.expect("client survives");
    assert!(!status.eviction_pending);
    assert_eq!(status.current_tier, None, "identify resets the committed tier");
    assert_eq!(status.manual_override, Some(Tier::C));
}

#[tokio::test]
async fn test_disconnect_unknown_client() {
    let (engine, _) = engine();
    assert_eq!(
        engine.disconnect("ghost").unwrap_err(),
        TierError::UnknownClient("ghost".to_string())
    );
}

#[tokio::test]
async fn test_identify_new_client() {
    let (engine, clock) = engine();
    assert!(engine.identify("fresh").await.unwrap());
    assert_eq!(engine.client_count(), 1);

    let d = engine.ingest(frame("fresh", &clock)).await.unwrap();
    assert!(d.is_first_connection);
}

#[tokio::test]
async fn test_padded_client_id_reaches_same_session() {
    let (engine, clock) = engine();
    assert!(engine.identify("c1").await.unwrap());

    let d = engine.ingest(frame(" c1 ", &clock)).await.unwrap();
    assert!(d.is_first_connection);
    assert_eq!(engine.client_ids(), vec!["c1".to_string()]);
    assert!(engine.status("c1").await.unwrap().last_route.is_some());
}

#[tokio::test]
async fn test_override_before_telemetry() {
    let (engine, clock) = engine();
    let d = engine.set_override("c1", Some("b")).await.unwrap();
    assert!(d.is_none(), "no metrics yet, nothing to recompute");

    let d = engine.ingest(frame("c1", &clock)).await.unwrap();
    assert_eq!(d.tier, Tier::B);
    assert!(d.is_override);
    assert_eq!(
        engine.status("c1").await.unwrap().consumption_samples,
        0,
        "override frames are not sampled"
    );
}

#[tokio::test]
async fn test_clear_override_on_unknown_client() {
    let (engine, _) = engine();
    assert_eq!(
        engine.set_override("ghost", None).await.unwrap_err().code(),
        "UNKNOWN_CLIENT"
    );
}

#[tokio::test]
async fn test_invalid_metrics_rejected_without_state() {
    let (engine, clock) = engine();
    let mut bad = frame("c1", &clock);
    bad.metrics.battery = 140.0;
    let err = engine.ingest(bad).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_METRICS");
    assert_eq!(engine.client_count(), 0);

    let structured = err.to_structured();
    assert!(!structured.retryable);
    assert!(structured.recovery_action.contains("battery"));
}

#[tokio::test]
async fn test_unknown_consent_rejected() {
    let (engine, clock) = engine();
    engine.ingest(frame("c1", &clock)).await.unwrap();
    let err = engine.record_consent("c1", "maybe").await.unwrap_err();
    assert_eq!(err, TierError::UnknownConsent("maybe".to_string()));
    assert_eq!(engine.status("c1").await.unwrap().consent, None);
}

#[tokio::test]
async fn test_reset_unknown_client() {
    let (engine, _) = engine();
    assert!(!engine.reset("ghost").await);
}

#[tokio::test]
async fn test_concurrent_clients_are_independent() {
    let (engine, clock) = engine();
    let engine = engine.shared();

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        let message = frame(&format!("client-{}", i), &clock);
        handles.push(tokio::spawn(async move { engine.ingest(message).await }));
    }
    for handle in handles {
        let decision = handle.await.unwrap().unwrap();
        assert!(decision.is_first_connection);
    }
    assert_eq!(engine.client_count(), 16);
}
