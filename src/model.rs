use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day — the only date type. Availability is judged per calendar
/// day, never per instant, so time zones cannot skew slot matching.
pub type Day = NaiveDate;

// ── Slot catalog ─────────────────────────────────────────────────

/// One of the two fixed daily shifts. The catalog is static: exactly two
/// slots, fixed order, never created or destroyed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// 09:00 to 14:00.
    Morning,
    /// 17:00 to 22:00.
    Evening,
}

impl Slot {
    /// All slots in display order.
    pub const CATALOG: [Slot; 2] = [Slot::Morning, Slot::Evening];

    pub fn id(&self) -> &'static str {
        match self {
            Slot::Morning => "slot1",
            Slot::Evening => "slot2",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Slot::Morning => "Morning (09:00 to 14:00)",
            Slot::Evening => "Evening (17:00 to 22:00)",
        }
    }

    /// Fixed wall-clock window of this shift.
    pub fn window(&self) -> (NaiveTime, NaiveTime) {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).expect("fixed slot window");
        match self {
            Slot::Morning => (t(9, 0), t(14, 0)),
            Slot::Evening => (t(17, 0), t(22, 0)),
        }
    }

    /// Accepts catalog ids and shift names, case-insensitive.
    pub fn parse(s: &str) -> Option<Slot> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slot1" | "morning" => Some(Slot::Morning),
            "slot2" | "evening" => Some(Slot::Evening),
            _ => None,
        }
    }
}

// ── Booking records ──────────────────────────────────────────────

/// Tariff class of the requesting organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    GovtA,
    NgoB,
    PrivateC,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::GovtA => "govt_a",
            Category::NgoB => "ngo_b",
            Category::PrivateC => "private_c",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().as_str() {
            "govt_a" | "govt" => Some(Category::GovtA),
            "ngo_b" | "ngo" => Some(Category::NgoB),
            "private_c" | "private" => Some(Category::PrivateC),
            _ => None,
        }
    }
}

/// Lifecycle state of a booking record. Closed set; the transition table
/// in `engine::transitions` is the only way status advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Confirmed,
    Paid,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that hold the slot against further allotment.
    pub fn occupies(&self) -> bool {
        matches!(
            self,
            BookingStatus::Approved | BookingStatus::Confirmed | BookingStatus::Paid
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Paid => "paid",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<BookingStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "approved" => Some(BookingStatus::Approved),
            "confirmed" => Some(BookingStatus::Confirmed),
            "paid" => Some(BookingStatus::Paid),
            "rejected" => Some(BookingStatus::Rejected),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

/// Settlement flag stamped on a record exactly once, at cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundTerms {
    /// Owner cancellation: 100% forfeiture of fees paid.
    Forfeit,
    /// Administrative revocation for official exigency.
    FullRefund,
}

impl RefundTerms {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundTerms::Forfeit => "forfeit",
            RefundTerms::FullRefund => "full_refund",
        }
    }
}

/// A booking request for one (day, slot) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    /// Owning requester account.
    pub requester: String,
    pub event_name: String,
    pub category: Category,
    pub date: Day,
    pub slot: Slot,
    pub status: BookingStatus,
    pub vip_presence: bool,
    /// Set once, at cancellation. `None` for every live record.
    pub refund: Option<RefundTerms>,
}

impl BookingRecord {
    /// Terminal records never transition again. `Confirmed`/`Paid` become
    /// terminal once the event day has passed; that is derived from the
    /// calendar, not stored.
    pub fn is_terminal(&self, today: Day) -> bool {
        match self.status {
            BookingStatus::Rejected | BookingStatus::Cancelled => true,
            BookingStatus::Confirmed | BookingStatus::Paid => self.date < today,
            BookingStatus::Pending | BookingStatus::Approved => false,
        }
    }
}

// ── Administrative blocks ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Emergency,
    State,
    Security,
    Maintenance,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Emergency => "emergency",
            BlockKind::State => "state",
            BlockKind::Security => "security",
            BlockKind::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<BlockKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emergency" => Some(BlockKind::Emergency),
            "state" => Some(BlockKind::State),
            "security" => Some(BlockKind::Security),
            "maintenance" => Some(BlockKind::Maintenance),
            _ => None,
        }
    }
}

/// A day-level administrative override. Its presence makes both shifts on
/// the date unavailable regardless of booking state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminBlock {
    pub id: Ulid,
    pub date: Day,
    pub reason: String,
    pub kind: BlockKind,
}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Requester,
    Admin,
}

/// Session identity supplied by the caller. Verification is the auth
/// collaborator's problem; the engine only checks role and ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub requester: String,
    pub role: Role,
}

impl Actor {
    pub fn requester(name: impl Into<String>) -> Self {
        Self {
            requester: name.into(),
            role: Role::Requester,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            requester: name.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn owns(&self, record: &BookingRecord) -> bool {
        self.requester == record.requester
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
/// Every event names its calendar day so replay can route it to the right
/// day register without an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingSubmitted {
        id: Ulid,
        requester: String,
        event_name: String,
        category: Category,
        date: Day,
        slot: Slot,
        vip_presence: bool,
    },
    BookingApproved {
        id: Ulid,
        date: Day,
    },
    BookingRejected {
        id: Ulid,
        date: Day,
    },
    BookingConfirmed {
        id: Ulid,
        date: Day,
    },
    BookingPaid {
        id: Ulid,
        date: Day,
    },
    BookingCancelled {
        id: Ulid,
        date: Day,
        refund: RefundTerms,
    },
    BlockCreated {
        id: Ulid,
        date: Day,
        reason: String,
        kind: BlockKind,
    },
    BlockLifted {
        id: Ulid,
        date: Day,
    },
}

impl Event {
    /// Calendar day the event belongs to.
    pub fn day(&self) -> Day {
        match self {
            Event::BookingSubmitted { date, .. }
            | Event::BookingApproved { date, .. }
            | Event::BookingRejected { date, .. }
            | Event::BookingConfirmed { date, .. }
            | Event::BookingPaid { date, .. }
            | Event::BookingCancelled { date, .. }
            | Event::BlockCreated { date, .. }
            | Event::BlockLifted { date, .. } => *date,
        }
    }
}

// ── Day register ─────────────────────────────────────────────────

/// Per-day register of booking records and administrative blocks. One
/// register behind one lock is the unit of snapshot consistency: a reader
/// holding the lock sees bookings and blocks from the same moment.
#[derive(Debug, Clone)]
pub struct DayRegister {
    pub date: Day,
    pub bookings: Vec<BookingRecord>,
    pub blocks: Vec<AdminBlock>,
}

impl DayRegister {
    pub fn new(date: Day) -> Self {
        Self {
            date,
            bookings: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&BookingRecord> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut BookingRecord> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn block(&self, id: Ulid) -> Option<&AdminBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<AdminBlock> {
        if let Some(pos) = self.blocks.iter().position(|b| b.id == id) {
            Some(self.blocks.remove(pos))
        } else {
            None
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Occupancy state of one (day, slot) pair as the resolver reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Available,
    Pending,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Pending => "pending",
            SlotStatus::Booked => "booked",
        }
    }
}

/// Day-level aggregate for calendar rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Open,
    HasPending,
    PartiallyBooked,
    FullyBooked,
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Open => "open",
            DayStatus::HasPending => "has_pending",
            DayStatus::PartiallyBooked => "partially_booked",
            DayStatus::FullyBooked => "fully_booked",
        }
    }
}

/// Both shift statuses plus the day aggregate, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySummary {
    pub date: Day,
    pub morning: SlotStatus,
    pub evening: SlotStatus,
    pub status: DayStatus,
}
