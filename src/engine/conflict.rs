use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> Timestamp {
    chrono::Local::now().naive_local()
}

pub(crate) fn validate_span(start: Timestamp, end: Timestamp) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_event_text(title: &str, description: Option<&str>) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::InvalidInput("event title must not be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("event title too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("event description too long"));
    }
    Ok(())
}

pub(crate) fn validate_resource_text(name: &str, resource_type: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("resource name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN || resource_type.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    Ok(())
}

/// First booking on `rs` whose event overlaps `candidate`, ignoring `exclude_event`.
///
/// Bookings are sorted by start, so everything from the first booking starting
/// at or after `candidate.end` onwards is skipped; the earliest overlap wins.
pub(crate) fn find_conflict<'a>(
    rs: &'a ResourceState,
    candidate: &Span,
    exclude_event: Option<Ulid>,
) -> Option<&'a BookedEvent> {
    let right_bound = rs.bookings.partition_point(|b| b.span.start < candidate.end);
    rs.bookings[..right_bound]
        .iter()
        .filter(|b| Some(b.event_id) != exclude_event)
        .find(|b| b.span.overlaps(candidate))
}

/// `Ok` when `candidate` fits on `rs`, otherwise the typed conflict naming both sides.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    candidate: &Span,
    exclude_event: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(rs, candidate, exclude_event) {
        None => Ok(()),
        Some(conflicting) => {
            metrics::counter!(crate::observability::SCHEDULING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(
                resource = %rs.id,
                conflicting_event = %conflicting.event_id,
                "scheduling conflict"
            );
            Err(EngineError::SchedulingConflict {
                resource_id: rs.id,
                resource_name: rs.name.clone(),
                conflicting: conflicting.clone(),
            })
        }
    }
}
