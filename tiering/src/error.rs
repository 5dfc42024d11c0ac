//! Tier engine error types
//!
//! Malformed input is rejected before any state is touched. Internal faults
//! are caught at the engine boundary and reported without mutating the
//! client's committed state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tier engine operations
pub type TierResult<T> = Result<T, TierError>;

/// Structured error payload for tool responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code (e.g., "UNKNOWN_TIER")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// What the caller should do next
    pub recovery_action: String,

    /// Whether resending the same request may succeed
    #[serde(default)]
    pub retryable: bool,
}

impl StructuredError {
    /// Create a new structured error
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            retryable: false,
        }
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Errors surfaced by the tier engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TierError {
    /// Telemetry or API call arrived without a client id
    #[error("Missing client id")]
    MissingClientId,

    /// A metrics field is outside its valid domain
    #[error("Invalid metrics: {field} {reason}")]
    InvalidMetrics { field: &'static str, reason: String },

    /// Override requested an unknown tier
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    /// Consent value not in the accepted vocabulary
    #[error("Unknown consent value: {0}")]
    UnknownConsent(String),

    /// Operation targeted a client with no session
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// Decision computation failed; committed state was left untouched
    #[error("Tier computation failed: {0}")]
    Internal(String),
}

impl TierError {
    /// Create an invalid metrics error
    pub fn invalid_metrics(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidMetrics {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingClientId => "MISSING_CLIENT_ID",
            Self::InvalidMetrics { .. } => "INVALID_METRICS",
            Self::UnknownTier(_) => "UNKNOWN_TIER",
            Self::UnknownConsent(_) => "UNKNOWN_CONSENT",
            Self::UnknownClient(_) => "UNKNOWN_CLIENT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may simply resend
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Convert to a structured error with a recovery hint
    pub fn to_structured(&self) -> StructuredError {
        let recovery = match self {
            Self::MissingClientId => "Include a non-empty client_id in the request".to_string(),
            Self::InvalidMetrics { field, .. } => {
                format!("Fix the '{}' field and resend the telemetry frame", field)
            }
            Self::UnknownTier(_) => {
                "Use one of A, B, C, D, or 'auto'/null to clear the override".to_string()
            }
            Self::UnknownConsent(_) => {
                "Use one of accept, deny, always-optimize, never-optimize".to_string()
            }
            Self::UnknownClient(_) => {
                "Identify the client or send telemetry before using this operation".to_string()
            }
            Self::Internal(_) => "Resend telemetry on the next sampling tick".to_string(),
        };

        let structured = StructuredError::new(self.code(), self.to_string(), recovery);
        if self.is_retryable() {
            structured.retryable()
        } else {
            structured
        }
    }

    /// Structured error JSON for tool responses
    pub fn to_structured_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_structured())
            .unwrap_or_else(|_| format!(r#"{{"code":"{}","message":"{}"}}"#, self.code(), self))
    }
}
