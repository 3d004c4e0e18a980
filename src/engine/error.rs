use ulid::Ulid;

use crate::model::{BookedEvent, Timestamp};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    InvalidInterval {
        start: Timestamp,
        end: Timestamp,
    },
    DuplicateAllocation {
        event_id: Ulid,
        resource_id: Ulid,
    },
    SchedulingConflict {
        resource_id: Ulid,
        resource_name: String,
        conflicting: BookedEvent,
    },
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code for the command protocol.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::DuplicateAllocation { .. } => "duplicate_allocation",
            EngineError::SchedulingConflict { .. } => "scheduling_conflict",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): end must be after start")
            }
            EngineError::DuplicateAllocation {
                event_id,
                resource_id,
            } => write!(
                f,
                "resource {resource_id} is already allocated to event {event_id}"
            ),
            EngineError::SchedulingConflict {
                resource_name,
                conflicting,
                ..
            } => write!(
                f,
                "conflict: {resource_name} is already booked for \"{}\" ({} - {})",
                conflicting.title,
                conflicting.span.start.format("%Y-%m-%d %H:%M"),
                conflicting.span.end.format("%H:%M"),
            ),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
