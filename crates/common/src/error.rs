use thiserror::Error;

/// Closed error taxonomy for the fabric. Business errors are
/// surfaced as events by their owning component rather than propagated past
/// the boundary where they occur; the ambient variants below (`Database`,
/// `Json`, `Io`, `Config`, `Http`) exist so `?` works end to end through
/// persistence, (de)serialization and startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("signal failed validation: {0}")]
    ValidationFailure(String),

    #[error("risk gate rejected: {0}")]
    RiskRejection(String),

    #[error("lost arbitration: superseded by {winner}")]
    Superseded { winner: String },

    #[error("broker transient error: {0}")]
    BrokerTransient(String),

    #[error("broker permanent error: {0}")]
    BrokerPermanent(String),

    #[error("order verification timed out")]
    VerificationTimeout,

    #[error("admission blocked: emergency stop latched ({0})")]
    EmergencyLatched(String),

    #[error("internal invariant breach: {0}")]
    InternalInvariantBreach(String),

    #[error("already active: {0}")]
    AlreadyActive(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
