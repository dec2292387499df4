mod availability;
mod catalog;
mod conflict;
mod error;
mod mutations;
pub mod policy;
mod queries;

pub use availability::availability_grid;
pub use catalog::SlotCatalog;
pub use error::EngineError;
pub use policy::ListingScope;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<Schedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One site's booking engine: per-resource schedules behind their own locks,
/// a slot catalog, and a WAL for durability. The conflict invariant holds
/// because every check-then-insert runs under one schedule write lock.
pub struct Engine {
    state: DashMap<Ulid, SharedSchedule>,
    /// Reverse lookup: booking id → resource id.
    booking_index: DashMap<Ulid, Ulid>,
    catalog: RwLock<SlotCatalog>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply an event directly to a Schedule (no locking — caller holds the lock).
fn apply_to_schedule(sched: &mut Schedule, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            resource_id,
            user,
            slot_id,
            date,
            purpose,
            created_at,
        } => {
            sched.bookings.push(Booking {
                id: *id,
                resource_id: *resource_id,
                user: user.clone(),
                slot_id: *slot_id,
                date: *date,
                purpose: purpose.clone(),
                status: BookingStatus::Pending,
                created_at: *created_at,
                approved_by: None,
                approved_at: None,
                rejected_by: None,
                rejected_at: None,
                rejection_reason: None,
                cancelled_at: None,
            });
            booking_index.insert(*id, *resource_id);
        }
        Event::BookingApproved { id, by, at } => {
            if let Some(b) = sched.booking_mut(*id) {
                b.status = BookingStatus::Approved;
                b.approved_by = Some(by.clone());
                b.approved_at = Some(*at);
            }
        }
        Event::BookingRejected { id, by, at, reason } => {
            if let Some(b) = sched.booking_mut(*id) {
                b.status = BookingStatus::Rejected;
                b.rejected_by = Some(by.clone());
                b.rejected_at = Some(*at);
                b.rejection_reason = reason.clone();
            }
        }
        Event::BookingCompleted { id } => {
            if let Some(b) = sched.booking_mut(*id) {
                b.status = BookingStatus::Completed;
            }
        }
        Event::BookingCancelled { id, at } => {
            if let Some(b) = sched.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.cancelled_at = Some(*at);
            }
        }
        Event::UsageRecorded {
            booking_id,
            by,
            at,
            remarks,
            issues,
        } => {
            sched.usage.insert(
                *booking_id,
                UsageRecord {
                    booking_id: *booking_id,
                    uploaded_by: by.clone(),
                    uploaded_at: *at,
                    remarks: remarks.clone(),
                    issues: issues.clone(),
                },
            );
        }
        Event::ResourceUpdated { patch, .. } => {
            if let Some(name) = &patch.name {
                sched.resource.name = name.clone();
            }
            if let Some(category) = &patch.category {
                sched.resource.category = category.clone();
            }
            if let Some(capacity) = patch.capacity {
                sched.resource.capacity = capacity;
            }
            if let Some(location) = &patch.location {
                sched.resource.location = location.clone();
            }
            if let Some(status) = patch.status {
                sched.resource.status = status;
            }
        }
        // ResourceCreated/Deleted and SlotCreated are handled at the
        // DashMap/catalog level, not here
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } | Event::SlotCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            booking_index: DashMap::new(),
            catalog: RwLock::new(SlotCatalog::new()),
            wal_tx,
            notify,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy site creation).
        for event in &events {
            match event {
                Event::ResourceCreated {
                    id,
                    name,
                    category,
                    capacity,
                    location,
                } => {
                    let resource = Resource {
                        id: *id,
                        name: name.clone(),
                        category: category.clone(),
                        capacity: *capacity,
                        location: location.clone(),
                        status: ResourceStatus::Available,
                    };
                    engine
                        .state
                        .insert(*id, Arc::new(RwLock::new(Schedule::new(resource))));
                }
                Event::ResourceDeleted { id } => {
                    if let Some((_, sched)) = engine.state.remove(id) {
                        let guard = sched.try_read().expect("replay: uncontended read");
                        for b in &guard.bookings {
                            engine.booking_index.remove(&b.id);
                        }
                    }
                }
                Event::SlotCreated {
                    id,
                    label,
                    start,
                    end,
                    active,
                } => {
                    let mut catalog =
                        engine.catalog.try_write().expect("replay: uncontended write");
                    catalog.insert(TimeSlot {
                        id: *id,
                        label: label.clone(),
                        start: *start,
                        end: *end,
                        active: *active,
                    });
                }
                other => {
                    let resource_id = engine.event_resource_id(other);
                    if let Some(resource_id) = resource_id
                        && let Some(entry) = engine.state.get(&resource_id) {
                            let sched = entry.clone();
                            let mut guard =
                                sched.try_write().expect("replay: uncontended write");
                            apply_to_schedule(&mut guard, other, &engine.booking_index);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_schedule(&self, id: &Ulid) -> Option<SharedSchedule> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: Ulid,
        sched: &mut Schedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(sched, event, &self.booking_index);
        self.notify.send(resource_id, event);
        Ok(())
    }

    /// Lookup booking → resource, get schedule, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<Schedule>), EngineError> {
        let resource_id = self
            .resource_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = sched.write_owned().await;
        Ok((resource_id, guard))
    }

    /// Extract the resource id from an event (for booking-scoped events the
    /// index is authoritative; creation events carry it inline).
    fn event_resource_id(&self, event: &Event) -> Option<Ulid> {
        match event {
            Event::BookingCreated { resource_id, .. } => Some(*resource_id),
            Event::BookingApproved { id, .. }
            | Event::BookingRejected { id, .. }
            | Event::BookingCompleted { id }
            | Event::BookingCancelled { id, .. } => self.resource_for_booking(id),
            Event::UsageRecorded { booking_id, .. } => self.resource_for_booking(booking_id),
            Event::ResourceUpdated { id, .. } => Some(*id),
            Event::ResourceCreated { .. }
            | Event::ResourceDeleted { .. }
            | Event::SlotCreated { .. } => None,
        }
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Booking histories are re-emitted as their
    /// creation plus the audit-stamped transitions that got them here.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        {
            // Inactive custom slots are still referenced by bookings, so the
            // whole catalog survives compaction.
            let catalog = self.catalog.read().await;
            for slot in catalog.iter() {
                events.push(Event::SlotCreated {
                    id: slot.id,
                    label: slot.label.clone(),
                    start: slot.start,
                    end: slot.end,
                    active: slot.active,
                });
            }
        }

        let resource_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for rid in resource_ids {
            let Some(sched) = self.get_schedule(&rid) else { continue };
            let guard = sched.read().await;

            events.push(Event::ResourceCreated {
                id: guard.resource.id,
                name: guard.resource.name.clone(),
                category: guard.resource.category.clone(),
                capacity: guard.resource.capacity,
                location: guard.resource.location.clone(),
            });
            if guard.resource.status != ResourceStatus::Available {
                events.push(Event::ResourceUpdated {
                    id: guard.resource.id,
                    patch: ResourcePatch {
                        status: Some(guard.resource.status),
                        ..Default::default()
                    },
                });
            }

            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    resource_id: b.resource_id,
                    user: b.user.clone(),
                    slot_id: b.slot_id,
                    date: b.date,
                    purpose: b.purpose.clone(),
                    created_at: b.created_at,
                });
                if let (Some(by), Some(at)) = (&b.approved_by, b.approved_at) {
                    events.push(Event::BookingApproved {
                        id: b.id,
                        by: by.clone(),
                        at,
                    });
                }
                if let (Some(by), Some(at)) = (&b.rejected_by, b.rejected_at) {
                    events.push(Event::BookingRejected {
                        id: b.id,
                        by: by.clone(),
                        at,
                        reason: b.rejection_reason.clone(),
                    });
                }
                if b.status == BookingStatus::Completed {
                    events.push(Event::BookingCompleted { id: b.id });
                }
                if let Some(at) = b.cancelled_at {
                    events.push(Event::BookingCancelled { id: b.id, at });
                }
            }

            for record in guard.usage.values() {
                events.push(Event::UsageRecorded {
                    booking_id: record.booking_id,
                    by: record.uploaded_by.clone(),
                    at: record.uploaded_at,
                    remarks: record.remarks.clone(),
                    issues: record.issues.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
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
