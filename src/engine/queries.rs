use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability;
use super::{Engine, EngineError};

impl Engine {
    /// One consistent snapshot of a day's register. Days the engine has
    /// never touched yield empty snapshots, which the resolver reports as
    /// fully available (a documented default, not an error).
    async fn day_snapshot(&self, date: Day) -> (Vec<BookingRecord>, Vec<AdminBlock>) {
        match self.day_register(date) {
            Some(reg) => {
                let guard = reg.read().await;
                (guard.bookings.clone(), guard.blocks.clone())
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Resolve every catalog slot for a date, in catalog order.
    pub async fn slot_statuses(&self, date: Day) -> Vec<(Slot, SlotStatus)> {
        let (bookings, blocks) = self.day_snapshot(date).await;
        Slot::CATALOG
            .iter()
            .map(|&slot| (slot, availability::resolve_status(date, slot, &bookings, &blocks)))
            .collect()
    }

    pub async fn summarize_day(&self, date: Day) -> DaySummary {
        let (bookings, blocks) = self.day_snapshot(date).await;
        availability::summarize_day(date, &bookings, &blocks)
    }

    /// Day summaries over an inclusive date range, for calendar rendering.
    pub async fn calendar(&self, from: Day, to: Day) -> Result<Vec<DaySummary>, EngineError> {
        if from > to {
            return Ok(Vec::new());
        }
        if (to - from).num_days() >= MAX_CALENDAR_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        let mut summaries = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            summaries.push(self.summarize_day(date).await);
        }
        Ok(summaries)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingRecord, EngineError> {
        let date = self.day_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let reg = self.day_register(date).ok_or(EngineError::NotFound(id))?;
        let guard = reg.read().await;
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn bookings_on(&self, date: Day) -> Vec<BookingRecord> {
        let (bookings, _) = self.day_snapshot(date).await;
        bookings
    }

    /// All of one requester's records, across days, oldest date first.
    pub async fn bookings_for_requester(&self, requester: &str) -> Vec<BookingRecord> {
        let mut dates: Vec<Day> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        let mut result = Vec::new();
        for date in dates {
            let Some(reg) = self.day_register(date) else {
                continue;
            };
            let guard = reg.read().await;
            result.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.requester == requester)
                    .cloned(),
            );
        }
        result
    }

    /// Every record across days, oldest date first. Admin dashboards only.
    pub async fn list_bookings(&self) -> Vec<BookingRecord> {
        let mut dates: Vec<Day> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        let mut result = Vec::new();
        for date in dates {
            let Some(reg) = self.day_register(date) else {
                continue;
            };
            let guard = reg.read().await;
            result.extend(guard.bookings.iter().cloned());
        }
        result
    }

    pub async fn blocks_on(&self, date: Day) -> Vec<AdminBlock> {
        let (_, blocks) = self.day_snapshot(date).await;
        blocks
    }

    pub async fn list_blocks(&self) -> Vec<AdminBlock> {
        let mut dates: Vec<Day> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        let mut result = Vec::new();
        for date in dates {
            let Some(reg) = self.day_register(date) else {
                continue;
            };
            let guard = reg.read().await;
            result.extend(guard.blocks.iter().cloned());
        }
        result
    }
}
