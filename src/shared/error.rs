use crate::shared::enums::TicketStatus;
use thiserror::Error;
use uuid::Uuid;

/// Failures at the persistence boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    Conflict(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

impl From<diesel::result::Error> for StorageError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => Self::NotFound("no matching record".to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

/// Intake pipeline error taxonomy.
///
/// Only `Storage` is surfaced to channel adapters as a hard failure of
/// `ingest`; every other condition is either caller-correctable
/// (`InvalidTransition`, `TicketClosed`) or absorbed into a degraded
/// outcome (`ClassificationUnavailable`).
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("invalid ticket transition {from} -> {to}")]
    InvalidTransition {
        from: TicketStatus,
        to: TicketStatus,
    },
    #[error("ticket {0} no longer accepts triage")]
    TicketClosed(Uuid),
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}
