//! MCP Server for the adaptive UI tier engine
//!
//! Exposes the engine's request/response interfaces as tools:
//! - `tier_ingest`: process one telemetry frame, return the decision
//! - `tier_identify`: (re)identify a client, resetting its committed tier
//! - `tier_disconnect`: schedule a client's state for eviction
//! - `tier_consent`: record a battery-optimization consent answer
//! - `tier_override`: force a tier or return to automatic selection
//! - `tier_debug_metrics`: force or release a metrics snapshot
//! - `tier_status`: inspect one client, or list all clients
//!
//! # Usage
//!
//! ```bash
//! # Defaults, overridable through TIER_* environment variables
//! tiering
//!
//! # TOML config plus a CLI override
//! tiering --config ./tiering.toml --hysteresis-secs 5
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use tokio::io::{stdin, stdout};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use tiering::{
    EngineConfig, MetricsSnapshot, SharedTierEngine, TelemetryMessage, TierEngine, TierError,
    TierEvent,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (replaces TIER_* environment variables)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Minimum seconds between non-emergency tier switches
    #[arg(long)]
    hysteresis_secs: Option<u64>,

    /// Seconds a disconnected client's state survives before purge
    #[arg(long)]
    eviction_grace_secs: Option<u64>,

    /// Minimum seconds between observer snapshots for a stable client
    #[arg(long)]
    observer_interval_secs: Option<u64>,

    /// Battery readings kept per client
    #[arg(long)]
    consumption_window: Option<usize>,

    /// Fps assumed for hidden or unmeasured pages
    #[arg(long)]
    hidden_fps_fallback: Option<f64>,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::from_env(),
        };
        if let Some(secs) = self.hysteresis_secs {
            config.hysteresis = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.eviction_grace_secs {
            config.eviction_grace = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.observer_interval_secs {
            config.observer_interval = std::time::Duration::from_secs(secs);
        }
        if let Some(n) = self.consumption_window {
            config.consumption_window = n;
        }
        if let Some(fps) = self.hidden_fps_fallback {
            config.hidden_fps_fallback = fps;
        }
        Ok(config)
    }
}

// ============================================================================
// MCP Request Types (use rmcp's schemars)
// ============================================================================

/// MCP request for tier_ingest tool
#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct IngestRequest {
    #[schemars(description = "Client identifier")]
    client_id: String,
    #[schemars(description = "Route the client is rendering (default: /)")]
    route: Option<String>,
    #[schemars(
        description = "Metrics snapshot: battery (0-100), batteryCharging, networkType (4g|3g|2g|slow-2g|wifi|ethernet|unknown), networkDownlink, cpuScore (0-100), fps (null when hidden), memoryTotal, memoryUsed, online"
    )]
    metrics: serde_json::Value,
    #[schemars(description = "RFC 3339 sample time (default: now)")]
    timestamp: Option<String>,
}

/// MCP request for tools addressing one client
#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ClientRequest {
    #[schemars(description = "Client identifier")]
    client_id: String,
}

/// MCP request for tier_consent tool
#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ConsentRequest {
    #[schemars(description = "Client identifier")]
    client_id: String,
    #[schemars(description = "One of accept, deny, always-optimize, never-optimize")]
    consent: String,
}

/// MCP request for tier_override tool
#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct OverrideRequest {
    #[schemars(description = "Client identifier")]
    client_id: String,
    #[schemars(description = "Tier A-D to force, or null/\"auto\" to clear")]
    tier: Option<String>,
}

/// MCP request for tier_debug_metrics tool
#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DebugMetricsRequest {
    #[schemars(description = "Client identifier")]
    client_id: String,
    #[schemars(description = "Metrics snapshot to force, or null to release")]
    metrics: Option<serde_json::Value>,
}

/// MCP request for tier_status tool
#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct StatusRequest {
    #[schemars(description = "Client identifier; omit to list all clients")]
    client_id: Option<String>,
}

fn parse_metrics(value: serde_json::Value) -> Result<MetricsSnapshot, String> {
    serde_json::from_value(value)
        .map_err(|e| TierError::invalid_metrics("metrics", e.to_string()).to_structured_json())
}

fn parse_timestamp(raw: Option<&str>) -> Result<DateTime<Utc>, String> {
    match raw {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                TierError::invalid_metrics("timestamp", e.to_string()).to_structured_json()
            }),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

#[derive(Clone)]
struct TierServer {
    engine: SharedTierEngine,
    tool_router: ToolRouter<Self>,
}

impl TierServer {
    fn new(engine: SharedTierEngine) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl TierServer {
    #[tool(
        description = "Process one telemetry frame for a client and return the tier decision (tier, reason, confidence, constraints and flags such as requiresConsent, emergency, skipSwitch)."
    )]
    async fn tier_ingest(
        &self,
        Parameters(req): Parameters<IngestRequest>,
    ) -> Result<String, String> {
        let metrics = parse_metrics(req.metrics)?;
        let timestamp = parse_timestamp(req.timestamp.as_deref())?;
        let message = TelemetryMessage::new(
            req.client_id,
            req.route.unwrap_or_default(),
            metrics,
            timestamp,
        );
        let decision = self
            .engine
            .ingest(message)
            .await
            .map_err(|e| e.to_structured_json())?;
        to_json(&decision)
    }

    #[tool(
        description = "Identify (or re-identify) a client. Cancels pending eviction and clears the committed tier and route memory so the next frame gets a fresh first-connection decision."
    )]
    async fn tier_identify(
        &self,
        Parameters(req): Parameters<ClientRequest>,
    ) -> Result<String, String> {
        let created = self
            .engine
            .identify(&req.client_id)
            .await
            .map_err(|e| e.to_structured_json())?;
        to_json(&serde_json::json!({ "clientId": req.client_id, "created": created }))
    }

    #[tool(
        description = "Mark a client as disconnected. Its state is purged after the eviction grace period unless it identifies again first."
    )]
    async fn tier_disconnect(
        &self,
        Parameters(req): Parameters<ClientRequest>,
    ) -> Result<String, String> {
        self.engine
            .disconnect(&req.client_id)
            .map_err(|e| e.to_structured_json())?;
        to_json(&serde_json::json!({
            "clientId": req.client_id,
            "evictionGraceSecs": self.engine.config().eviction_grace.as_secs(),
        }))
    }

    #[tool(
        description = "Record a consent answer for battery-motivated downgrades. accept and always-optimize immediately recompute and return a fresh decision."
    )]
    async fn tier_consent(
        &self,
        Parameters(req): Parameters<ConsentRequest>,
    ) -> Result<String, String> {
        let decision = self
            .engine
            .record_consent(&req.client_id, &req.consent)
            .await
            .map_err(|e| e.to_structured_json())?;
        to_json(&decision)
    }

    #[tool(
        description = "Force a tier (A, B, C or D) for a client, or pass null/\"auto\" to return to automatic selection."
    )]
    async fn tier_override(
        &self,
        Parameters(req): Parameters<OverrideRequest>,
    ) -> Result<String, String> {
        let decision = self
            .engine
            .set_override(&req.client_id, req.tier.as_deref())
            .await
            .map_err(|e| e.to_structured_json())?;
        to_json(&decision)
    }

    #[tool(
        description = "Testing aid: force a metrics snapshot that replaces the client's telemetry until released with null."
    )]
    async fn tier_debug_metrics(
        &self,
        Parameters(req): Parameters<DebugMetricsRequest>,
    ) -> Result<String, String> {
        let metrics = req.metrics.map(parse_metrics).transpose()?;
        let decision = self
            .engine
            .set_debug_metrics(&req.client_id, metrics)
            .await
            .map_err(|e| e.to_structured_json())?;
        to_json(&decision)
    }

    #[tool(
        description = "Read-only status: committed tier, override, consent, battery analysis and route records for one client, or the list of connected clients."
    )]
    async fn tier_status(
        &self,
        Parameters(req): Parameters<StatusRequest>,
    ) -> Result<String, String> {
        match req.client_id {
            Some(id) => match self.engine.status(&id).await {
                Some(status) => to_json(&status),
                None => Err(TierError::UnknownClient(id).to_structured_json()),
            },
            None => to_json(&serde_json::json!({
                "clientCount": self.engine.client_count(),
                "clients": self.engine.client_ids(),
            })),
        }
    }
}

#[tool_handler]
impl ServerHandler for TierServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = "Adaptive UI tier engine. Tiers rank A (richest) > B > C > D (survival).\n\
             - Send telemetry with tier_ingest on the client's sampling cadence.\n\
             - When a decision has requiresConsent=true, ask the user and report the answer with tier_consent.\n\
             - Call tier_identify on (re)connect and tier_disconnect on close.\n\
             - tier_status is read-only and safe to call anytime.\n\
             Errors are structured JSON with a recovery_action field.";

        ServerInfo {
            instructions: Some(instructions.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Log decisions and observer snapshots from the event bus
fn spawn_event_logger(engine: &SharedTierEngine) -> tokio::task::JoinHandle<()> {
    let mut receiver = engine.events().subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(TierEvent::DecisionPushed {
                    client_id,
                    route,
                    decision,
                    ..
                }) => info!(
                    client_id,
                    route,
                    tier = %decision.tier,
                    reason = %decision.reason,
                    "Decision pushed"
                ),
                Ok(TierEvent::ObserverSnapshot {
                    client_id,
                    decision,
                    ..
                }) => debug!(client_id, tier = %decision.tier, "Observer snapshot"),
                Ok(event) => debug!(
                    client_id = event.client_id(),
                    event_type = event.event_type(),
                    "Engine event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tiering=info".parse().context("parsing log directive")?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.engine_config()?;
    info!(
        hysteresis_secs = config.hysteresis.as_secs(),
        eviction_grace_secs = config.eviction_grace.as_secs(),
        "Starting tier engine MCP server"
    );

    let engine = TierEngine::new(config).shared();
    let logger = spawn_event_logger(&engine);

    let transport = (stdin(), stdout());
    let service = TierServer::new(engine).serve(transport).await?;

    service.waiting().await?;
    logger.abort();

    Ok(())
}
