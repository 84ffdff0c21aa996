use ulid::Ulid;

use crate::model::{BookingStatus, Day, Role, Slot};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Requested status change not permitted from the current state.
    InvalidTransition {
        from: BookingStatus,
        action: &'static str,
    },
    /// Actor lacks the role or ownership the action requires.
    Forbidden {
        action: &'static str,
        role: Role,
    },
    /// Slot already holds an occupying record.
    Conflict {
        date: Day,
        slot: Slot,
    },
    /// Date carries an administrative block.
    DateBlocked(Day),
    /// Submission outside the advance booking window.
    OutsideWindow(&'static str),
    LimitExceeded(&'static str),
    /// Store I/O failure. Propagated un-recovered; retry is the caller's call.
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a booking in status {}", from.as_str())
            }
            EngineError::Forbidden { action, role } => {
                write!(f, "{role:?} may not {action}")
            }
            EngineError::Conflict { date, slot } => {
                write!(f, "slot {} on {date} already holds an allotment", slot.id())
            }
            EngineError::DateBlocked(date) => {
                write!(f, "{date} is blocked for administrative reasons")
            }
            EngineError::OutsideWindow(msg) => write!(f, "outside booking window: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
