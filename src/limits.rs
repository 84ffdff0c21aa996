//! Hard caps protecting the engine from unbounded input.

/// Earliest a booking may be submitted: 30 days ahead of today.
pub const MIN_ADVANCE_DAYS: i64 = 30;

/// Latest a booking may be submitted: 12 months ahead of today.
pub const MAX_ADVANCE_DAYS: i64 = 365;

/// Upper bound on event names.
pub const MAX_EVENT_NAME_LEN: usize = 200;

/// Upper bound on block reasons. Reasons are free text but not essays.
pub const MAX_REASON_LEN: usize = 500;

/// Booking records per calendar day (duplicate pending requests coexist).
pub const MAX_BOOKINGS_PER_DAY: usize = 64;

/// Administrative blocks per calendar day (duplicates coexist, no dedup).
pub const MAX_BLOCKS_PER_DAY: usize = 16;

/// Widest calendar query, in days.
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 366;

/// Venue (tenant) caps.
pub const MAX_VENUES: usize = 64;
pub const MAX_VENUE_NAME_LEN: usize = 128;
