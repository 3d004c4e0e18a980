use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_event_text, validate_resource_text, validate_span};
use super::store::InMemoryStore;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Events ───────────────────────────────────────────────

    pub async fn create_event(
        &self,
        title: String,
        description: Option<String>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Ulid, EngineError> {
        validate_event_text(&title, description.as_deref())?;
        let span = validate_span(start, end)?;
        if self.store.event_count() >= MAX_EVENTS {
            return Err(EngineError::LimitExceeded("too many events"));
        }

        let _gate = self.commit_gate.read().await;
        let id = Ulid::new();
        let change = Change::EventCreated {
            id,
            title: title.clone(),
            description: description.clone(),
            span,
        };
        self.wal_append(&change).await?;
        self.store.insert_event(EventState {
            id,
            title,
            description,
            span,
        });
        debug!(event = %id, "event created");
        Ok(id)
    }

    /// Replace an event's fields. Every existing allocation is re-validated
    /// against the new interval first; any conflict rejects the whole update.
    pub async fn update_event(
        &self,
        id: Ulid,
        title: String,
        description: Option<String>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<(), EngineError> {
        validate_event_text(&title, description.as_deref())?;
        let span = validate_span(start, end)?;

        let _gate = self.commit_gate.read().await;
        let mut event = self.lock_event_write(id).await?;
        let resource_ids = self.store.resources_of_event(&id);
        let mut guards = self.lock_resources_write(&resource_ids).await;

        for rs in &guards {
            check_no_conflict(rs, &span, Some(id))?;
        }

        let change = Change::EventUpdated {
            id,
            title: title.clone(),
            description: description.clone(),
            span,
        };
        self.wal_append(&change).await?;
        self.store.apply_event_updated(
            &mut event,
            guards.iter_mut().map(|g| &mut **g),
            title,
            description,
            span,
        );
        debug!(event = %id, resources = guards.len(), "event updated");
        Ok(())
    }

    /// Delete an event together with all of its allocations.
    pub async fn delete_event(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let _event = self.lock_event_write(id).await?;
        let resource_ids = self.store.resources_of_event(&id);
        let mut guards = self.lock_resources_write(&resource_ids).await;

        self.wal_append(&Change::EventDeleted { id }).await?;
        self.store
            .apply_event_deleted(id, guards.iter_mut().map(|g| &mut **g));
        debug!(event = %id, "event deleted");
        Ok(())
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(
        &self,
        name: String,
        resource_type: String,
    ) -> Result<Ulid, EngineError> {
        validate_resource_text(&name, &resource_type)?;
        if self.store.resource_count() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let _gate = self.commit_gate.read().await;
        let id = Ulid::new();
        let change = Change::ResourceCreated {
            id,
            name: name.clone(),
            resource_type: resource_type.clone(),
        };
        self.wal_append(&change).await?;
        self.store
            .insert_resource(ResourceState::new(id, name, resource_type));
        debug!(resource = %id, "resource created");
        Ok(id)
    }

    pub async fn update_resource(
        &self,
        id: Ulid,
        name: String,
        resource_type: String,
    ) -> Result<(), EngineError> {
        validate_resource_text(&name, &resource_type)?;

        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_resource_write(id).await?;
        let change = Change::ResourceUpdated {
            id,
            name: name.clone(),
            resource_type: resource_type.clone(),
        };
        self.wal_append(&change).await?;
        InMemoryStore::apply_resource_updated(&mut guard, name, resource_type);
        Ok(())
    }

    /// Delete a resource together with all of its allocations.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_resource_write(id).await?;
        self.wal_append(&Change::ResourceDeleted { id }).await?;
        let freed = guard.bookings.len();
        self.store.apply_resource_deleted(&mut guard);
        debug!(resource = %id, freed, "resource deleted");
        Ok(())
    }

    // ── Allocations ──────────────────────────────────────────

    /// Bind a resource to an event for the event's duration.
    ///
    /// The duplicate check, the conflict check and the commit all happen
    /// under the resource's write lock, so two racing allocations cannot
    /// both pass validation.
    pub async fn allocate(&self, event_id: Ulid, resource_id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.commit_gate.read().await;
        let event = self.lock_event_read(event_id).await?;
        let mut rs = self.lock_resource_write(resource_id).await?;

        if rs.booking_for_event(event_id).is_some() {
            return Err(EngineError::DuplicateAllocation {
                event_id,
                resource_id,
            });
        }
        if rs.bookings.len() >= MAX_ALLOCATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many allocations on resource"));
        }
        check_no_conflict(&rs, &event.span, None)?;

        let id = Ulid::new();
        let change = Change::AllocationCreated {
            id,
            event_id,
            resource_id,
        };
        self.wal_append(&change).await?;
        self.store.apply_allocation_created(&event, &mut rs, id);
        metrics::counter!(crate::observability::ALLOCATIONS_CREATED_TOTAL).increment(1);
        debug!(allocation = %id, event = %event_id, resource = %resource_id, "allocated");
        Ok(id)
    }

    /// Remove an allocation, freeing the resource for that slot. Returns the resource id.
    pub async fn deallocate(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.commit_gate.read().await;
        let (_, resource_id) = self.store.allocation(&id).ok_or(EngineError::NotFound(id))?;
        let mut rs = self
            .lock_resource_write(resource_id)
            .await
            .map_err(|_| EngineError::NotFound(id))?;
        // A cascade may have removed it while we waited for the lock.
        if self.store.allocation(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        self.wal_append(&Change::AllocationDeleted { id, resource_id })
            .await?;
        self.store.apply_allocation_deleted(&mut rs, id);
        debug!(allocation = %id, resource = %resource_id, "deallocated");
        Ok(resource_id)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the changes needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let changes = self.store.snapshot();
        let count = changes.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { changes, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} changes");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
