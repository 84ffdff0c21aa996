mod availability;
mod error;
mod mutations;
mod policy;
mod queries;
mod transitions;
#[cfg(test)]
mod tests;

pub use availability::{day_status, resolve_status, summarize_day};
pub use error::EngineError;
pub use policy::today;
pub use transitions::{apply_transition, refund_for_revocation, BookingAction};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedDayRegister = Arc<RwLock<DayRegister>>;

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
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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

// ── Engine ───────────────────────────────────────────────

/// One venue's allotment register: per-day booking and block state, WAL
/// persistence, and change notifications.
pub struct Engine {
    pub days: DashMap<Day, SharedDayRegister>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking/block id → calendar day.
    pub(super) entity_to_day: DashMap<Ulid, Day>,
}

/// Apply an event directly to a DayRegister (no locking — caller holds the lock).
fn apply_to_day(reg: &mut DayRegister, event: &Event, entity_map: &DashMap<Ulid, Day>) {
    match event {
        Event::BookingSubmitted {
            id,
            requester,
            event_name,
            category,
            date,
            slot,
            vip_presence,
        } => {
            reg.bookings.push(BookingRecord {
                id: *id,
                requester: requester.clone(),
                event_name: event_name.clone(),
                category: *category,
                date: *date,
                slot: *slot,
                status: BookingStatus::Pending,
                vip_presence: *vip_presence,
                refund: None,
            });
            entity_map.insert(*id, *date);
        }
        Event::BookingApproved { id, .. } => set_status(reg, *id, BookingStatus::Approved),
        Event::BookingRejected { id, .. } => set_status(reg, *id, BookingStatus::Rejected),
        Event::BookingConfirmed { id, .. } => set_status(reg, *id, BookingStatus::Confirmed),
        Event::BookingPaid { id, .. } => set_status(reg, *id, BookingStatus::Paid),
        Event::BookingCancelled { id, refund, .. } => {
            if let Some(b) = reg.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.refund = Some(*refund);
            }
        }
        Event::BlockCreated {
            id,
            date,
            reason,
            kind,
        } => {
            reg.blocks.push(AdminBlock {
                id: *id,
                date: *date,
                reason: reason.clone(),
                kind: *kind,
            });
            entity_map.insert(*id, *date);
        }
        Event::BlockLifted { id, .. } => {
            reg.remove_block(*id);
            entity_map.remove(id);
        }
    }
}

fn set_status(reg: &mut DayRegister, id: Ulid, status: BookingStatus) {
    if let Some(b) = reg.booking_mut(id) {
        b.status = status;
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            days: DashMap::new(),
            wal_tx,
            notify,
            entity_to_day: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (lazy venue creation).
        for event in &events {
            let day = event.day();
            let reg_arc = engine
                .days
                .entry(day)
                .or_insert_with(|| Arc::new(RwLock::new(DayRegister::new(day))))
                .clone();
            let mut guard = reg_arc.try_write().expect("replay: uncontended write");
            apply_to_day(&mut guard, event, &engine.entity_to_day);
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn day_register(&self, date: Day) -> Option<SharedDayRegister> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    pub(super) fn get_or_create_day(&self, date: Day) -> SharedDayRegister {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayRegister::new(date))))
            .clone()
    }

    pub fn day_for_entity(&self, entity_id: &Ulid) -> Option<Day> {
        self.entity_to_day.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. `owner` routes the notice to
    /// the requester channel on top of the date channel.
    pub(super) async fn persist_and_apply(
        &self,
        reg: &mut DayRegister,
        owner: Option<&str>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(reg, event, &self.entity_to_day);
        self.notify.publish(event.day(), owner, event);
        Ok(())
    }

    /// Lookup entity → day, get the register, acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Day, tokio::sync::OwnedRwLockWriteGuard<DayRegister>), EngineError> {
        let date = self
            .day_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let reg = self
            .day_register(date)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = reg.write_owned().await;
        Ok((date, guard))
    }
}
