//! Error types for stuck-core.
//!
//! The engine itself has almost no failure surface: unknown repositories and
//! redundant calls are no-ops. Errors exist for the configuration boundary
//! and for subscribers reporting delivery failures.

/// All errors that can occur in stuck-core operations.
#[derive(Debug, thiserror::Error)]
pub enum StuckError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration value out of range: {field} = {value} (expected {min}..={max})")]
    ConfigOutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Configuration rejected: {0}")]
    ConfigInvalid(String),

    // ─────────────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Subscriber failed: {0}")]
    Subscriber(String),
}

/// Convenience type alias for Results using StuckError.
pub type Result<T> = std::result::Result<T, StuckError>;

impl From<StuckError> for String {
    fn from(err: StuckError) -> String {
        err.to_string()
    }
}
