use ulid::Ulid;

use crate::model::*;

use super::conflict::{find_conflict, validate_span};
use super::{Engine, EngineError};

fn allocation_info(resource_id: Ulid, b: &BookedEvent) -> AllocationInfo {
    AllocationInfo {
        id: b.allocation_id,
        event_id: b.event_id,
        resource_id,
        title: b.title.clone(),
        start: b.span.start,
        end: b.span.end,
    }
}

impl Engine {
    pub async fn get_event(&self, id: Ulid) -> Result<EventInfo, EngineError> {
        let event = self.store.event(&id).ok_or(EngineError::NotFound(id))?;
        let guard = event.read().await;
        Ok(guard.info())
    }

    /// All events ordered by start time.
    pub async fn list_events(&self) -> Vec<EventInfo> {
        let mut events = Vec::with_capacity(self.store.event_count());
        for id in self.store.event_ids() {
            if let Some(event) = self.store.event(&id) {
                events.push(event.read().await.info());
            }
        }
        events.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        events
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self.store.resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    /// All resources in creation order.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut resources = Vec::with_capacity(self.store.resource_count());
        for id in self.store.resource_ids() {
            if let Some(rs) = self.store.resource(&id) {
                resources.push(rs.read().await.info());
            }
        }
        resources
    }

    pub async fn get_allocation(&self, id: Ulid) -> Result<AllocationInfo, EngineError> {
        let (_, resource_id) = self.store.allocation(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self
            .store
            .resource(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.allocation_id == id)
            .map(|b| allocation_info(resource_id, b))
            .ok_or(EngineError::NotFound(id))
    }

    /// Every allocation, grouped by resource and ordered by start within each.
    pub async fn list_allocations(&self) -> Vec<AllocationInfo> {
        let mut allocations = Vec::with_capacity(self.store.allocation_count());
        for id in self.store.resource_ids() {
            if let Some(rs) = self.store.resource(&id) {
                let guard = rs.read().await;
                allocations.extend(guard.bookings.iter().map(|b| allocation_info(id, b)));
            }
        }
        allocations
    }

    /// Allocations on a resource joined with their event's title and interval, ordered by start.
    pub async fn allocations_for_resource(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<AllocationInfo>, EngineError> {
        let rs = self
            .store
            .resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .bookings
            .iter()
            .map(|b| allocation_info(resource_id, b))
            .collect())
    }

    pub async fn allocations_for_event(
        &self,
        event_id: Ulid,
    ) -> Result<Vec<AllocationInfo>, EngineError> {
        if !self.store.contains_event(&event_id) {
            return Err(EngineError::NotFound(event_id));
        }
        let mut allocations = Vec::new();
        for resource_id in self.store.resources_of_event(&event_id) {
            if let Some(rs) = self.store.resource(&resource_id) {
                let guard = rs.read().await;
                if let Some(b) = guard.booking_for_event(event_id) {
                    allocations.push(allocation_info(resource_id, b));
                }
            }
        }
        Ok(allocations)
    }

    /// Some existing allocation on `resource_id` whose event overlaps `[start, end)`,
    /// ignoring the allocation of `exclude_event` if given.
    pub async fn find_conflict(
        &self,
        resource_id: Ulid,
        start: Timestamp,
        end: Timestamp,
        exclude_event: Option<Ulid>,
    ) -> Result<Option<BookedEvent>, EngineError> {
        let candidate = validate_span(start, end)?;
        let rs = self
            .store
            .resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(find_conflict(&guard, &candidate, exclude_event).cloned())
    }
}
