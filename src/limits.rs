// Hard limits enforced by the engine. Anything above these is rejected with
// `EngineError::LimitExceeded` before touching the WAL.

pub const MAX_SERVICE_POINTS: usize = 100_000;
pub const MAX_POSTS_PER_POINT: usize = 64;
pub const MAX_BOOKINGS_PER_DAY: usize = 4_096;
pub const MAX_LINE_ITEMS: usize = 64;
pub const MAX_LINE_ITEM_QUANTITY: u32 = 1_000;

pub const MIN_SLOT_DURATION_MIN: u32 = 15;
pub const MAX_SLOT_DURATION_MIN: u32 = 480;

/// Longest single booking, in minutes.
pub const MAX_BOOKING_DURATION_MIN: u32 = 24 * 60;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTE_LEN: usize = 4_096;

/// Upper bound on slot candidates examined by a single forward scan.
pub const MAX_SCAN_STEPS: usize = 24 * 60 / MIN_SLOT_DURATION_MIN as usize;
