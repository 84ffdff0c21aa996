use crate::model::*;

use super::EngineError;

// ── Booking Status Machine ───────────────────────────────────────

/// Requested change to a booking record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingAction {
    /// Admin accepts a pending request.
    Approve,
    /// Admin declines a pending request.
    Reject,
    /// Owning requester withdraws. Fees are forfeited in full.
    Cancel,
    /// Payment step recorded as a confirmed allotment.
    Confirm,
    /// Payment step recorded as paid.
    Pay,
    /// Administrative revocation. An "official exigency" reason flips the
    /// settlement from forfeiture to a full refund.
    Revoke { reason: String },
}

impl BookingAction {
    pub fn name(&self) -> &'static str {
        match self {
            BookingAction::Approve => "approve",
            BookingAction::Reject => "reject",
            BookingAction::Cancel => "cancel",
            BookingAction::Confirm => "confirm",
            BookingAction::Pay => "pay",
            BookingAction::Revoke { .. } => "revoke",
        }
    }
}

const EXIGENCY_PHRASE: &str = "official exigency";

/// Settlement terms for an administrative revocation.
pub fn refund_for_revocation(reason: &str) -> RefundTerms {
    if reason.to_ascii_lowercase().contains(EXIGENCY_PHRASE) {
        RefundTerms::FullRefund
    } else {
        RefundTerms::Forfeit
    }
}

/// Apply `action` to a copy of `record` under the transition table.
///
/// The input record is untouched either way: a rejected transition returns
/// only the error, so no partial write can ever escape. `today` decides
/// whether a confirmed allotment has already elapsed and become terminal.
pub fn apply_transition(
    record: &BookingRecord,
    action: &BookingAction,
    actor: &Actor,
    today: Day,
) -> Result<BookingRecord, EngineError> {
    use BookingStatus::*;

    if record.is_terminal(today) {
        return Err(invalid(record, action));
    }

    let mut next = record.clone();
    match action {
        BookingAction::Approve => {
            require_admin(actor, "approve")?;
            if record.status != Pending {
                return Err(invalid(record, action));
            }
            next.status = Approved;
        }
        BookingAction::Reject => {
            require_admin(actor, "reject")?;
            if record.status != Pending {
                return Err(invalid(record, action));
            }
            next.status = Rejected;
        }
        BookingAction::Cancel => {
            if !actor.owns(record) {
                return Err(EngineError::Forbidden {
                    action: "cancel",
                    role: actor.role,
                });
            }
            if !matches!(record.status, Pending | Approved) {
                return Err(invalid(record, action));
            }
            next.status = Cancelled;
            next.refund = Some(RefundTerms::Forfeit);
        }
        BookingAction::Confirm | BookingAction::Pay => {
            // Settlement itself happens at the payment collaborator; the
            // owner or an admin records the outcome here.
            if !actor.is_admin() && !actor.owns(record) {
                return Err(EngineError::Forbidden {
                    action: action.name(),
                    role: actor.role,
                });
            }
            if record.status != Approved {
                return Err(invalid(record, action));
            }
            next.status = if matches!(action, BookingAction::Pay) {
                Paid
            } else {
                Confirmed
            };
        }
        BookingAction::Revoke { reason } => {
            require_admin(actor, "revoke")?;
            // Any non-terminal state; terminal was rejected above.
            next.status = Cancelled;
            next.refund = Some(refund_for_revocation(reason));
        }
    }

    Ok(next)
}

fn invalid(record: &BookingRecord, action: &BookingAction) -> EngineError {
    EngineError::InvalidTransition {
        from: record.status,
        action: action.name(),
    }
}

fn require_admin(actor: &Actor, action: &'static str) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden {
            action,
            role: actor.role,
        })
    }
}
