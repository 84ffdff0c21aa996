use chrono::Local;

use crate::limits::*;
use crate::model::Day;

use super::EngineError;

/// Today per the system clock. Engine operations take `today` as an argument
/// so tests can pin the calendar; the wire layer passes this value.
pub fn today() -> Day {
    Local::now().date_naive()
}

/// Submissions must land inside the advance window: at least 30 days and at
/// most 12 months ahead. Administrative blocks are exempt.
pub(crate) fn validate_booking_date(date: Day, today: Day) -> Result<(), EngineError> {
    let lead = (date - today).num_days();
    if lead < MIN_ADVANCE_DAYS {
        return Err(EngineError::OutsideWindow(
            "bookings need 30 days advance notice",
        ));
    }
    if lead > MAX_ADVANCE_DAYS {
        return Err(EngineError::OutsideWindow(
            "bookings open 12 months ahead at most",
        ));
    }
    Ok(())
}

pub(crate) fn validate_event_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::LimitExceeded("event name is empty"));
    }
    if name.len() > MAX_EVENT_NAME_LEN {
        return Err(EngineError::LimitExceeded("event name too long"));
    }
    Ok(())
}

pub(crate) fn validate_reason(reason: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::LimitExceeded("block reason is empty"));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("block reason too long"));
    }
    Ok(())
}
