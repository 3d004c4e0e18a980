mod conflict;
mod error;
mod mutations;
mod queries;
mod reports;
mod store;

pub use error::EngineError;
pub use reports::{pairwise_conflicts, report_window, utilization_row};
pub use store::{InMemoryStore, SharedEventState, SharedResourceState};

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        change: Change,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        changes: Vec<Change>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Stage it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single commit for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { change, response } => {
                let mut batch = vec![(change, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { change, response }) => {
                            batch.push((change, response));
                        }
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, batch);
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Commit a batch. A change that cannot be staged is answered with its own
/// error and kept out of the batch; every staged change then shares the
/// outcome of one commit, which is all-or-nothing on disk.
fn commit_batch(wal: &mut Wal, batch: Vec<(Change, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut staged = Vec::with_capacity(batch.len());
    for (change, tx) in batch {
        match wal.stage(&change) {
            Ok(()) => staged.push(tx),
            Err(e) => {
                tracing::error!("WAL rejected change: {e}");
                let _ = tx.send(Err(e));
            }
        }
    }

    let result = wal.commit();
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL commit failed for batch of {}: {e}", staged.len());
    }
    for tx in staged {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { changes, response } => {
            let result = Wal::write_compact_file(wal.path(), &changes)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The allocation engine: the entity store plus its durable change log.
///
/// Lock order: commit gate, then at most one event, then resources in
/// ascending id order.
pub struct Engine {
    pub store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every mutation across its WAL append and apply; taken
    /// exclusively by compaction so the snapshot matches the log.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    /// Open the WAL at `wal_path` (cutting any damaged tail), replay it, and
    /// spawn the writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, changes) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::new();
        for change in &changes {
            store.replay(change);
        }
        info!(
            "replayed {} changes from {}: {} events, {} resources, {} allocations",
            changes.len(),
            wal_path.display(),
            store.event_count(),
            store.resource_count(),
            store.allocation_count()
        );

        Ok(Self {
            store,
            wal_tx,
            commit_gate: RwLock::new(()),
        })
    }

    /// Write a change to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, change: &Change) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                change: change.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Lookup event, acquire its write lock, and confirm it survived the wait.
    pub(super) async fn lock_event_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<EventState>, EngineError> {
        let event = self.store.event(&id).ok_or(EngineError::NotFound(id))?;
        let guard = event.write_owned().await;
        if !self.store.contains_event(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub(super) async fn lock_event_read(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<EventState>, EngineError> {
        let event = self.store.event(&id).ok_or(EngineError::NotFound(id))?;
        let guard = event.read_owned().await;
        if !self.store.contains_event(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub(super) async fn lock_resource_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let rs = self.store.resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write_owned().await;
        if !self.store.contains_resource(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Write-lock every resource in `ids` (ascending order). Resources deleted
    /// in the meantime are skipped.
    pub(super) async fn lock_resources_write(
        &self,
        ids: &[Ulid],
    ) -> Vec<OwnedRwLockWriteGuard<ResourceState>> {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "lock order");
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(guard) = self.lock_resource_write(*id).await {
                guards.push(guard);
            }
        }
        guards
    }
}
