use chrono::{NaiveDate, NaiveTime, TimeDelta};
use ulid::Ulid;

use crate::limits::MAX_REPORT_RESOURCES;
use crate::model::*;

use super::conflict::now;
use super::{Engine, EngineError};

/// Every overlapping pair of bookings on one resource, each pair once,
/// earlier-starting booking first.
///
/// Bookings are sorted by start, so the inner scan stops at the first
/// booking that starts at or after `first` ends.
pub fn pairwise_conflicts(rs: &ResourceState) -> Vec<ConflictPair> {
    let mut pairs = Vec::new();
    for (i, first) in rs.bookings.iter().enumerate() {
        for second in &rs.bookings[i + 1..] {
            if second.span.start >= first.span.end {
                break;
            }
            if first.span.overlaps(&second.span) {
                pairs.push(ConflictPair {
                    resource_id: rs.id,
                    resource_name: rs.name.clone(),
                    first: first.clone(),
                    second: second.clone(),
                });
            }
        }
    }
    pairs
}

fn day_start(date: NaiveDate) -> Timestamp {
    date.and_time(NaiveTime::MIN)
}

fn day_end(date: NaiveDate) -> Timestamp {
    day_start(date) + TimeDelta::seconds(86_399)
}

/// The inclusive date window `[start_date 00:00:00, end_date 23:59:59]`.
pub fn report_window(start_date: NaiveDate, end_date: NaiveDate) -> Result<Span, EngineError> {
    if start_date > end_date {
        return Err(EngineError::InvalidInterval {
            start: day_start(start_date),
            end: day_end(end_date),
        });
    }
    Ok(Span::new(day_start(start_date), day_end(end_date)))
}

/// Booked hours and upcoming count for the bookings fully inside `window`.
/// Bookings straddling a window edge are excluded, not clipped.
pub fn utilization_row(rs: &ResourceState, window: &Span, now: Timestamp) -> UtilizationRow {
    let mut total_hours = 0.0;
    let mut upcoming_count = 0;
    for b in rs.bookings.iter().filter(|b| window.contains_span(&b.span)) {
        total_hours += b.span.duration_hours();
        if b.span.start > now {
            upcoming_count += 1;
        }
    }
    UtilizationRow {
        resource_id: rs.id,
        resource_name: rs.name.clone(),
        resource_type: rs.resource_type.clone(),
        total_hours: (total_hours * 100.0).round() / 100.0,
        upcoming_count,
    }
}

impl Engine {
    /// Audit view of double bookings across every resource. In steady state
    /// this is empty; anything it returns is data that slipped past validation.
    pub async fn list_all_conflicts(&self) -> Vec<ConflictPair> {
        let mut conflicts = Vec::new();
        for id in self.store.resource_ids() {
            if let Some(rs) = self.store.resource(&id) {
                let guard = rs.read().await;
                conflicts.extend(pairwise_conflicts(&guard));
            }
        }
        if !conflicts.is_empty() {
            tracing::warn!("{} overlapping allocation pairs found", conflicts.len());
        }
        conflicts
    }

    /// Per-resource utilization inside an inclusive date window, measured against the local clock.
    /// `None` reports every resource.
    pub async fn utilization_report(
        &self,
        resource_ids: Option<&[Ulid]>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<UtilizationRow>, EngineError> {
        self.utilization_report_at(resource_ids, start_date, end_date, now())
            .await
    }

    pub async fn utilization_report_at(
        &self,
        resource_ids: Option<&[Ulid]>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        now: Timestamp,
    ) -> Result<Vec<UtilizationRow>, EngineError> {
        let window = report_window(start_date, end_date)?;
        let ids = match resource_ids {
            Some(ids) if ids.len() > MAX_REPORT_RESOURCES => {
                return Err(EngineError::LimitExceeded("too many resource IDs"));
            }
            Some(ids) => ids.to_vec(),
            None => self.store.resource_ids(),
        };

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let rs = match self.store.resource(&id) {
                Some(rs) => rs,
                None if resource_ids.is_some() => return Err(EngineError::NotFound(id)),
                None => continue,
            };
            let guard = rs.read().await;
            rows.push(utilization_row(&guard, &window, now));
        }
        Ok(rows)
    }
}
