use crate::model::Ms;

pub const HOUR_MS: Ms = 3_600_000;

/// A pending booking stays payable for this long after creation.
pub const EXPIRY_WINDOW_MS: Ms = 24 * HOUR_MS;

/// Pending bookings with this little time left are flagged as urgent.
pub const URGENT_WINDOW_MS: Ms = 6 * HOUR_MS;

pub const MIN_PARTY_SIZE: i64 = 1;
pub const MAX_PARTY_SIZE: i64 = 20;

pub const MAX_BOOKINGS: usize = 100_000;
pub const MAX_PERIODS: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;

/// Longest stay a manual booking may describe.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest window a calendar query may ask for.
pub const MAX_CALENDAR_DAYS: i64 = 400;

pub const MAX_ACTIVITY_ENTRIES: usize = 10_000;
pub const DEFAULT_ACTIVITY_LIMIT: usize = 100;

/// Max bytes per protocol line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
