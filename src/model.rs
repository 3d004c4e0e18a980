use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Naive local wall-clock time — the only time type.
pub type Timestamp = NaiveDateTime;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`, endpoints included.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }
}

/// An allocation as seen from its resource: the binding joined with a
/// snapshot of the owning event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedEvent {
    pub allocation_id: Ulid,
    pub event_id: Ulid,
    pub title: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EventState {
    pub id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
}

impl EventState {
    pub fn info(&self) -> EventInfo {
        EventInfo {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            start: self.span.start,
            end: self.span.end,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub resource_type: String,
    /// Allocations on this resource, sorted by `span.start`.
    pub bookings: Vec<BookedEvent>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String, resource_type: String) -> Self {
        Self {
            id,
            name,
            resource_type,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: BookedEvent) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    /// Remove booking by allocation id.
    pub fn remove_booking(&mut self, allocation_id: Ulid) -> Option<BookedEvent> {
        let pos = self
            .bookings
            .iter()
            .position(|b| b.allocation_id == allocation_id)?;
        Some(self.bookings.remove(pos))
    }

    /// Remove every booking belonging to an event, returning their allocation ids.
    pub fn remove_event(&mut self, event_id: Ulid) -> Vec<Ulid> {
        let mut removed = Vec::new();
        self.bookings.retain(|b| {
            if b.event_id == event_id {
                removed.push(b.allocation_id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Rewrite the event snapshot of every booking for `event_id`, keeping sort order.
    pub fn retime_event(&mut self, event_id: Ulid, title: &str, span: Span) {
        let mut touched = false;
        for b in self.bookings.iter_mut().filter(|b| b.event_id == event_id) {
            b.title = title.to_string();
            b.span = span;
            touched = true;
        }
        if touched {
            self.bookings.sort_by_key(|b| b.span.start);
        }
    }

    pub fn booking_for_event(&self, event_id: Ulid) -> Option<&BookedEvent> {
        self.bookings.iter().find(|b| b.event_id == event_id)
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            resource_type: self.resource_type.clone(),
            allocation_count: self.bookings.len(),
        }
    }
}

/// The change types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    EventCreated {
        id: Ulid,
        title: String,
        description: Option<String>,
        span: Span,
    },
    EventUpdated {
        id: Ulid,
        title: String,
        description: Option<String>,
        span: Span,
    },
    /// Cascades to every allocation of the event.
    EventDeleted {
        id: Ulid,
    },
    ResourceCreated {
        id: Ulid,
        name: String,
        resource_type: String,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        resource_type: String,
    },
    /// Cascades to every allocation on the resource.
    ResourceDeleted {
        id: Ulid,
    },
    AllocationCreated {
        id: Ulid,
        event_id: Ulid,
        resource_id: Ulid,
    },
    AllocationDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventInfo {
    pub id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub resource_type: String,
    pub allocation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationInfo {
    pub id: Ulid,
    pub event_id: Ulid,
    pub resource_id: Ulid,
    pub title: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Two allocations on one resource whose events overlap. `first` starts no later than `second`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPair {
    pub resource_id: Ulid,
    pub resource_name: String,
    pub first: BookedEvent,
    pub second: BookedEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationRow {
    pub resource_id: Ulid,
    pub resource_name: String,
    pub resource_type: String,
    pub total_hours: f64,
    pub upcoming_count: usize,
}
