use crate::model::*;

// ── Availability Resolver ────────────────────────────────────────

/// Resolve the occupancy state of one (day, slot) pair from snapshots of
/// booking and block records.
///
/// Total and deterministic: no clock, no hidden state, and empty snapshots
/// resolve `Available` for every slot. The minimum-advance rule is the
/// submission boundary's concern, not this function's; it reports
/// occupancy only.
pub fn resolve_status(
    date: Day,
    slot: Slot,
    bookings: &[BookingRecord],
    blocks: &[AdminBlock],
) -> SlotStatus {
    // Day-level override wins over shift-level booking state, so a block
    // short-circuits before any booking is consulted.
    if blocks.iter().any(|b| b.date == date) {
        return SlotStatus::Booked;
    }

    let mut pending = false;
    for b in bookings.iter().filter(|b| b.date == date && b.slot == slot) {
        if b.status.occupies() {
            // One occupying record suffices. Several on the same slot is a
            // data-integrity violation this function reports, never repairs.
            return SlotStatus::Booked;
        }
        if b.status == BookingStatus::Pending {
            pending = true;
        }
    }

    if pending {
        SlotStatus::Pending
    } else {
        SlotStatus::Available
    }
}

/// Day aggregate for calendar rendering.
/// Precedence: FullyBooked, PartiallyBooked, HasPending, Open.
pub fn day_status(morning: SlotStatus, evening: SlotStatus) -> DayStatus {
    let booked = [morning, evening]
        .iter()
        .filter(|s| **s == SlotStatus::Booked)
        .count();
    match booked {
        2 => DayStatus::FullyBooked,
        1 => DayStatus::PartiallyBooked,
        _ if morning == SlotStatus::Pending || evening == SlotStatus::Pending => {
            DayStatus::HasPending
        }
        _ => DayStatus::Open,
    }
}

/// Resolve both shifts of a day plus the aggregate in one pass.
pub fn summarize_day(date: Day, bookings: &[BookingRecord], blocks: &[AdminBlock]) -> DaySummary {
    let morning = resolve_status(date, Slot::Morning, bookings, blocks);
    let evening = resolve_status(date, Slot::Evening, bookings, blocks);
    DaySummary {
        date,
        morning,
        evening,
        status: day_status(morning, evening),
    }
}
