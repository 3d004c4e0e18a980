use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedEventState = Arc<RwLock<EventState>>;
pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Events, resources and the allocation indexes between them.
///
/// Entity state lives behind per-entity locks; the indexes are plain
/// `DashMap`s and are only mutated by the `apply_*` methods, which callers
/// invoke while holding the write locks of every entity the change touches.
pub struct InMemoryStore {
    events: DashMap<Ulid, SharedEventState>,
    resources: DashMap<Ulid, SharedResourceState>,
    /// allocation id → (event id, resource id)
    allocations: DashMap<Ulid, (Ulid, Ulid)>,
    /// event id → resources it holds allocations on
    event_resources: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            resources: DashMap::new(),
            allocations: DashMap::new(),
            event_resources: DashMap::new(),
        }
    }

    // ── Events ───────────────────────────────────────────────

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn contains_event(&self, id: &Ulid) -> bool {
        self.events.contains_key(id)
    }

    pub fn event(&self, id: &Ulid) -> Option<SharedEventState> {
        self.events.get(id).map(|e| e.value().clone())
    }

    pub fn event_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.events.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn insert_event(&self, state: EventState) {
        self.events.insert(state.id, Arc::new(RwLock::new(state)));
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    pub fn resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.resources.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn insert_resource(&self, state: ResourceState) {
        self.resources.insert(state.id, Arc::new(RwLock::new(state)));
    }

    // ── Allocation index ─────────────────────────────────────

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// `(event_id, resource_id)` of an allocation.
    pub fn allocation(&self, id: &Ulid) -> Option<(Ulid, Ulid)> {
        self.allocations.get(id).map(|e| *e.value())
    }

    /// Resources the event is allocated to, in ascending id order (the lock order).
    pub fn resources_of_event(&self, event_id: &Ulid) -> Vec<Ulid> {
        let mut ids = self
            .event_resources
            .get(event_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.sort();
        ids.dedup();
        ids
    }

    fn link_allocation(&self, id: Ulid, event_id: Ulid, resource_id: Ulid) {
        self.allocations.insert(id, (event_id, resource_id));
        self.event_resources
            .entry(event_id)
            .or_default()
            .push(resource_id);
    }

    fn unlink_allocation(&self, id: &Ulid) {
        let Some((_, (event_id, resource_id))) = self.allocations.remove(id) else {
            return;
        };
        if let Some(mut rids) = self.event_resources.get_mut(&event_id)
            && let Some(pos) = rids.iter().position(|r| *r == resource_id)
        {
            rids.swap_remove(pos);
        }
        self.event_resources
            .remove_if(&event_id, |_, rids| rids.is_empty());
    }

    // ── Change application ───────────────────────────────────

    pub fn apply_allocation_created(
        &self,
        event: &EventState,
        rs: &mut ResourceState,
        allocation_id: Ulid,
    ) {
        rs.insert_booking(BookedEvent {
            allocation_id,
            event_id: event.id,
            title: event.title.clone(),
            span: event.span,
        });
        self.link_allocation(allocation_id, event.id, rs.id);
    }

    pub fn apply_allocation_deleted(&self, rs: &mut ResourceState, allocation_id: Ulid) {
        rs.remove_booking(allocation_id);
        self.unlink_allocation(&allocation_id);
    }

    /// Caller holds the event lock and the locks of every resource it is allocated to.
    pub fn apply_event_updated<'a>(
        &self,
        event: &mut EventState,
        resources: impl IntoIterator<Item = &'a mut ResourceState>,
        title: String,
        description: Option<String>,
        span: Span,
    ) {
        for rs in resources {
            rs.retime_event(event.id, &title, span);
        }
        event.title = title;
        event.description = description;
        event.span = span;
    }

    /// Caller holds the event lock and the locks of every resource it is allocated to.
    pub fn apply_event_deleted<'a>(
        &self,
        event_id: Ulid,
        resources: impl IntoIterator<Item = &'a mut ResourceState>,
    ) {
        for rs in resources {
            for allocation_id in rs.remove_event(event_id) {
                self.unlink_allocation(&allocation_id);
            }
        }
        self.event_resources.remove(&event_id);
        self.events.remove(&event_id);
    }

    pub fn apply_resource_updated(rs: &mut ResourceState, name: String, resource_type: String) {
        rs.name = name;
        rs.resource_type = resource_type;
    }

    /// Caller holds the resource lock.
    pub fn apply_resource_deleted(&self, rs: &mut ResourceState) {
        for booking in rs.bookings.drain(..) {
            self.unlink_allocation(&booking.allocation_id);
        }
        self.resources.remove(&rs.id);
    }

    /// Apply a replayed WAL record. Only used while the store has a single owner,
    /// so every lock is uncontended.
    pub fn replay(&self, change: &Change) {
        match change {
            Change::EventCreated {
                id,
                title,
                description,
                span,
            } => self.insert_event(EventState {
                id: *id,
                title: title.clone(),
                description: description.clone(),
                span: *span,
            }),
            Change::EventUpdated {
                id,
                title,
                description,
                span,
            } => {
                let Some(event) = self.event(id) else { return };
                let mut event = event.try_write().expect("replay: uncontended write");
                let resources = self.replay_resources(&self.resources_of_event(id));
                let mut guards: Vec<_> = resources
                    .iter()
                    .map(|rs| rs.try_write().expect("replay: uncontended write"))
                    .collect();
                self.apply_event_updated(
                    &mut event,
                    guards.iter_mut().map(|g| &mut **g),
                    title.clone(),
                    description.clone(),
                    *span,
                );
            }
            Change::EventDeleted { id } => {
                let resources = self.replay_resources(&self.resources_of_event(id));
                let mut guards: Vec<_> = resources
                    .iter()
                    .map(|rs| rs.try_write().expect("replay: uncontended write"))
                    .collect();
                self.apply_event_deleted(*id, guards.iter_mut().map(|g| &mut **g));
            }
            Change::ResourceCreated {
                id,
                name,
                resource_type,
            } => self.insert_resource(ResourceState::new(*id, name.clone(), resource_type.clone())),
            Change::ResourceUpdated {
                id,
                name,
                resource_type,
            } => {
                if let Some(rs) = self.resource(id) {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    Self::apply_resource_updated(&mut guard, name.clone(), resource_type.clone());
                }
            }
            Change::ResourceDeleted { id } => {
                if let Some(rs) = self.resource(id) {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    self.apply_resource_deleted(&mut guard);
                }
            }
            Change::AllocationCreated {
                id,
                event_id,
                resource_id,
            } => {
                let (Some(event), Some(rs)) = (self.event(event_id), self.resource(resource_id))
                else {
                    return;
                };
                let event = event.try_read().expect("replay: uncontended read");
                let mut guard = rs.try_write().expect("replay: uncontended write");
                self.apply_allocation_created(&event, &mut guard, *id);
            }
            Change::AllocationDeleted { id, resource_id } => {
                if let Some(rs) = self.resource(resource_id) {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    self.apply_allocation_deleted(&mut guard, *id);
                }
            }
        }
    }

    fn replay_resources(&self, ids: &[Ulid]) -> Vec<SharedResourceState> {
        ids.iter().filter_map(|id| self.resource(id)).collect()
    }

    /// The minimal change list that recreates the current state.
    /// Caller must have excluded all writers.
    pub fn snapshot(&self) -> Vec<Change> {
        let mut changes = Vec::new();
        let mut allocations = Vec::new();

        for id in self.resource_ids() {
            let Some(rs) = self.resource(&id) else { continue };
            let guard = rs.try_read().expect("snapshot: writers excluded");
            changes.push(Change::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                resource_type: guard.resource_type.clone(),
            });
            for b in &guard.bookings {
                allocations.push(Change::AllocationCreated {
                    id: b.allocation_id,
                    event_id: b.event_id,
                    resource_id: guard.id,
                });
            }
        }

        for id in self.event_ids() {
            let Some(event) = self.event(&id) else { continue };
            let guard = event.try_read().expect("snapshot: writers excluded");
            changes.push(Change::EventCreated {
                id: guard.id,
                title: guard.title.clone(),
                description: guard.description.clone(),
                span: guard.span,
            });
        }

        changes.extend(allocations);
        changes
    }
}
