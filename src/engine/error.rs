use ulid::Ulid;

use super::validate::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Customer,
    Vehicle,
    Reservation,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Customer => "Customer",
            Self::Vehicle => "Vehicle",
            Self::Reservation => "Reservation",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// The referenced record does not exist — distinct from bad data so
    /// callers can tell "bad reference" apart from "bad fields".
    NotFound(EntityKind, Ulid),
    AlreadyExists(Ulid),
    /// One or more invariant violations; the write was fully rejected.
    Validation(ValidationReport),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{} not found: {id}", kind.name()),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(report) => {
                write!(f, "validation failed: {}", report.full_messages().join(", "))
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
