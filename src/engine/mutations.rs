use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::resolve_status;
use super::transitions::{apply_transition, BookingAction};
use super::{policy, Engine, EngineError, WalCommand};

impl Engine {
    /// File a new booking request. The record starts `Pending`; an occupied
    /// or blocked slot is refused outright, while a slot that merely holds
    /// other pending requests accepts the duplicate (approval settles the
    /// race).
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_booking(
        &self,
        id: Ulid,
        requester: String,
        event_name: String,
        category: Category,
        date: Day,
        slot: Slot,
        vip_presence: bool,
        today: Day,
    ) -> Result<(), EngineError> {
        policy::validate_event_name(&event_name)?;
        policy::validate_booking_date(date, today)?;
        if self.entity_to_day.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let reg = self.get_or_create_day(date);
        let mut guard = reg.write_owned().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this day"));
        }

        match resolve_status(date, slot, &guard.bookings, &guard.blocks) {
            SlotStatus::Booked => {
                if guard.blocks.iter().any(|b| b.date == date) {
                    return Err(EngineError::DateBlocked(date));
                }
                return Err(EngineError::Conflict { date, slot });
            }
            SlotStatus::Pending | SlotStatus::Available => {}
        }

        let event = Event::BookingSubmitted {
            id,
            requester: requester.clone(),
            event_name,
            category,
            date,
            slot,
            vip_presence,
        };
        self.persist_and_apply(&mut guard, Some(&requester), &event)
            .await
    }

    pub async fn approve_booking(
        &self,
        id: Ulid,
        actor: &Actor,
        today: Day,
    ) -> Result<(), EngineError> {
        self.transition_booking(id, BookingAction::Approve, actor, today)
            .await
    }

    pub async fn reject_booking(
        &self,
        id: Ulid,
        actor: &Actor,
        today: Day,
    ) -> Result<(), EngineError> {
        self.transition_booking(id, BookingAction::Reject, actor, today)
            .await
    }

    pub async fn confirm_booking(
        &self,
        id: Ulid,
        actor: &Actor,
        today: Day,
    ) -> Result<(), EngineError> {
        self.transition_booking(id, BookingAction::Confirm, actor, today)
            .await
    }

    pub async fn pay_booking(&self, id: Ulid, actor: &Actor, today: Day) -> Result<(), EngineError> {
        self.transition_booking(id, BookingAction::Pay, actor, today)
            .await
    }

    /// Owner withdrawal. Forfeits fees in full.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        actor: &Actor,
        today: Day,
    ) -> Result<(), EngineError> {
        self.transition_booking(id, BookingAction::Cancel, actor, today)
            .await
    }

    /// Administrative revocation. The reason decides the settlement terms.
    pub async fn revoke_booking(
        &self,
        id: Ulid,
        reason: &str,
        actor: &Actor,
        today: Day,
    ) -> Result<(), EngineError> {
        self.transition_booking(
            id,
            BookingAction::Revoke {
                reason: reason.to_string(),
            },
            actor,
            today,
        )
        .await
    }

    /// Shared driver: validate the transition against the status machine,
    /// re-check slot exclusivity when the record starts occupying, persist.
    async fn transition_booking(
        &self,
        id: Ulid,
        action: BookingAction,
        actor: &Actor,
        today: Day,
    ) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_entity_write(&id).await?;
        let record = guard
            .booking(id)
            .ok_or(EngineError::NotFound(id))?
            .clone();

        let next = apply_transition(&record, &action, actor, today)?;

        // A slot never acquires a second occupying record, and a blocked
        // date approves nothing. Checked under the day's write lock.
        if next.status.occupies() && !record.status.occupies() {
            if guard.blocks.iter().any(|b| b.date == record.date) {
                return Err(EngineError::DateBlocked(record.date));
            }
            if guard
                .bookings
                .iter()
                .any(|b| b.id != id && b.slot == record.slot && b.status.occupies())
            {
                return Err(EngineError::Conflict {
                    date: record.date,
                    slot: record.slot,
                });
            }
        }

        let event = status_event(&next);
        self.persist_and_apply(&mut guard, Some(&record.requester), &event)
            .await
    }

    /// Place a day-level administrative block. Always succeeds for a valid
    /// date and non-empty reason; duplicates on the same date coexist. Every
    /// live booking on the date is revoked with a full refund first, under
    /// the same write lock, so the block and its cascade land together.
    pub async fn create_block(
        &self,
        id: Ulid,
        date: Day,
        reason: String,
        kind: BlockKind,
        actor: &Actor,
        today: Day,
    ) -> Result<(), EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden {
                action: "block",
                role: actor.role,
            });
        }
        policy::validate_reason(&reason)?;
        if self.entity_to_day.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let reg = self.get_or_create_day(date);
        let mut guard = reg.write_owned().await;
        if guard.blocks.len() >= MAX_BLOCKS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many blocks on this day"));
        }

        let affected: Vec<(Ulid, String)> = guard
            .bookings
            .iter()
            .filter(|b| !b.is_terminal(today))
            .map(|b| (b.id, b.requester.clone()))
            .collect();
        for (booking_id, owner) in &affected {
            let event = Event::BookingCancelled {
                id: *booking_id,
                date,
                refund: RefundTerms::FullRefund,
            };
            self.persist_and_apply(&mut guard, Some(owner), &event)
                .await?;
        }
        if !affected.is_empty() {
            tracing::info!(
                "block on {date} cascaded {} cancellation(s) with full refund",
                affected.len()
            );
        }

        let event = Event::BlockCreated {
            id,
            date,
            reason,
            kind,
        };
        self.persist_and_apply(&mut guard, None, &event).await
    }

    /// Lift a block. Bookings cancelled by the block's cascade stay
    /// cancelled; removal is not reversal.
    pub async fn lift_block(&self, id: Ulid, actor: &Actor) -> Result<Day, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden {
                action: "lift block",
                role: actor.role,
            });
        }
        let (date, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.block(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlockLifted { id, date };
        self.persist_and_apply(&mut guard, None, &event).await?;
        Ok(date)
    }

    // ── Retention ────────────────────────────────────────

    /// Days older than the retention horizon, candidates for dropping.
    pub fn collect_stale_days(&self, today: Day, retention_days: i64) -> Vec<Day> {
        self.days
            .iter()
            .filter(|e| (today - *e.key()).num_days() > retention_days)
            .map(|e| *e.key())
            .collect()
    }

    /// Drop a day register from memory. The WAL still carries its events
    /// until the next compaction, so a crash in between resurrects the day;
    /// the reaper then drops it again.
    pub async fn drop_day(&self, date: Day) {
        if let Some((_, reg)) = self.days.remove(&date) {
            let guard = reg.read().await;
            for b in &guard.bookings {
                self.entity_to_day.remove(&b.id);
            }
            for b in &guard.blocks {
                self.entity_to_day.remove(&b.id);
            }
            self.notify.remove_date(date);
        }
    }

    // ── WAL compaction ───────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one submission per booking plus at most
    /// one status event, one creation per block.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut days: Vec<Day> = self.days.iter().map(|e| *e.key()).collect();
        days.sort();

        let mut events = Vec::new();
        for date in days {
            let Some(reg) = self.day_register(date) else {
                continue; // dropped concurrently by the reaper
            };
            let guard = reg.read().await;
            for b in &guard.bookings {
                events.push(Event::BookingSubmitted {
                    id: b.id,
                    requester: b.requester.clone(),
                    event_name: b.event_name.clone(),
                    category: b.category,
                    date: b.date,
                    slot: b.slot,
                    vip_presence: b.vip_presence,
                });
                // Replay applies status events directly, so one suffices
                // even for records that advanced through several states.
                match b.status {
                    BookingStatus::Pending => {}
                    BookingStatus::Approved => {
                        events.push(Event::BookingApproved { id: b.id, date: b.date })
                    }
                    BookingStatus::Rejected => {
                        events.push(Event::BookingRejected { id: b.id, date: b.date })
                    }
                    BookingStatus::Confirmed => {
                        events.push(Event::BookingConfirmed { id: b.id, date: b.date })
                    }
                    BookingStatus::Paid => {
                        events.push(Event::BookingPaid { id: b.id, date: b.date })
                    }
                    BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                        id: b.id,
                        date: b.date,
                        refund: b.refund.unwrap_or(RefundTerms::Forfeit),
                    }),
                }
            }
            for b in &guard.blocks {
                events.push(Event::BlockCreated {
                    id: b.id,
                    date: b.date,
                    reason: b.reason.clone(),
                    kind: b.kind,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
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

/// Map a transitioned record to the event that records its new status.
fn status_event(next: &BookingRecord) -> Event {
    match next.status {
        BookingStatus::Approved => Event::BookingApproved {
            id: next.id,
            date: next.date,
        },
        BookingStatus::Rejected => Event::BookingRejected {
            id: next.id,
            date: next.date,
        },
        BookingStatus::Confirmed => Event::BookingConfirmed {
            id: next.id,
            date: next.date,
        },
        BookingStatus::Paid => Event::BookingPaid {
            id: next.id,
            date: next.date,
        },
        BookingStatus::Cancelled => Event::BookingCancelled {
            id: next.id,
            date: next.date,
            refund: next.refund.unwrap_or(RefundTerms::Forfeit),
        },
        BookingStatus::Pending => unreachable!("no transition lands on Pending"),
    }
}
