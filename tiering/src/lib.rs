//! Adaptive UI Tier Engine
//!
//! Decides, per connected client, which presentation tier (A richest to D
//! survival) the client should render, from a stream of device telemetry.
//!
//! # Features
//!
//! - Performance and battery-drain analysis over a sliding window
//! - Hysteresis against tier flicker
//! - Emergency survival tier (offline, critical battery, frozen page)
//! - Consent gating for battery-motivated downgrades
//! - Per-route tier floor so a page never renders poorer within a session
//! - Manual override and forced debug metrics
//!
//! # Usage
//!
//! ```ignore
//! use tiering::{EngineConfig, TierEngine, TelemetryMessage};
//!
//! let engine = TierEngine::new(EngineConfig::from_env()).shared();
//! engine.identify("client-1").await?;
//! let decision = engine.ingest(TelemetryMessage::new("client-1", "/", metrics, Utc::now())).await?;
//! println!("render tier {}", decision.tier);
//! ```
//!
//! The `tiering` binary exposes the engine as MCP tools over stdio.

#![allow(clippy::uninlined_format_args)]

pub mod clock;
pub mod config;
pub mod consent;
pub mod consumption;
pub mod decision;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod policy;
pub mod route_memory;
pub mod session;
pub mod store;
pub mod tier;

// Re-export key types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::EngineConfig;
pub use consent::{Consent, ConsentLedger};
pub use consumption::{ConsumptionAnalysis, ConsumptionTracker, DrainTrend};
pub use decision::{Decision, Direction, RouteContext, Trigger};
pub use emergency::{EmergencyCause, EmergencyDetector};
pub use engine::{ClientStatus, RouteStatus, SharedTierEngine, TierEngine};
pub use error::{StructuredError, TierError, TierResult};
pub use events::{EventBus, EventBusExt, EventFilter, SharedEventBus, TierEvent};
pub use metrics::{MetricsSnapshot, NetworkType, TelemetryMessage};
pub use policy::{SampleMode, TierPolicy};
pub use route_memory::{RouteMemory, RouteTierRecord};
pub use session::{ClientContext, ClientId, ClientSession};
pub use store::{SessionStore, SharedSessionStore};
pub use tier::{ImageQuality, Tier, TierConstraints};
