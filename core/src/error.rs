// ── Cohort Core: Error Types ────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, network, API, config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Only invariant violations (corrupted state, unknown schema version) are
//     meant to propagate out of a character loop; everything else is caught
//     by the routine/service that produced it and turned into a rotation
//     signal — see §7 of the design spec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parse failure.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Game API returned a well-formed error response.
    #[error("game API error {status}{}: {message}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Api {
        status: u16,
        code: Option<u32>,
        message: String,
    },

    /// Engine or character configuration is invalid or missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// Persisted state is structurally invalid or carries an unknown schema
    /// version. The one class of error the spec requires to surface as hard
    /// failure rather than be swallowed by a routine.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A domain-level decision failure: unwinnable fight, skill too low,
    /// recipe cycle, unreachable resource, and the like. Always caught and
    /// translated into a rotation signal by the caller — never propagated.
    #[error("domain error: {0}")]
    Domain(String),

    /// A `TtlCache` waiter's in-flight fetch owner was lost (panicked,
    /// cancelled, or failed) before it could send a result. A transient,
    /// expected failure per spec §7 — callers retry next tick, never crash.
    #[error("cache fetch lost: {0}")]
    CacheFetchLost(#[from] crate::cache::CacheFetchLost),
}

impl EngineError {
    pub fn api(status: u16, code: Option<u32>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True for the 476 "item not consumable" game error code.
    pub fn is_not_consumable(&self) -> bool {
        matches!(self, Self::Api { code: Some(476), .. })
            || matches!(self, Self::Api { status: 476, .. })
    }

    /// True for the 478 "missing items for trade" game error code.
    pub fn is_missing_items(&self) -> bool {
        matches!(self, Self::Api { code: Some(478), .. })
            || matches!(self, Self::Api { status: 478, .. })
    }

    /// True for statuses the HTTP client is expected to have already retried;
    /// a caller seeing this means retries were exhausted.
    pub fn is_retryable_exhausted(&self) -> bool {
        matches!(self, Self::Api { status, .. } if crate::api::retry::is_retryable_status(*status))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
