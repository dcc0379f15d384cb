use crate::model::Ms;

// Timestamp sanity window. Reservations are wall-clock bookings, so anything
// before the epoch or past 2100 is a caller bug, not a booking.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000; // 2100-01-01T00:00:00Z

/// One reservation may not span more than a year.
pub const MAX_RESERVATION_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Guardrail against unbounded growth of a single vehicle's booking list.
pub const MAX_RESERVATIONS_PER_VEHICLE: usize = 10_000;

// Field length bounds, mirrored by the validator's error messages.
pub const NAME_MIN_LEN: usize = 2;
pub const NAME_MAX_LEN: usize = 100;
pub const MAKE_MAX_LEN: usize = 50;
pub const MODEL_MAX_LEN: usize = 50;
pub const COLOR_MAX_LEN: usize = 30;
pub const PLATE_MAX_LEN: usize = 20;

/// Vehicle model years must be strictly greater than this.
pub const MIN_VEHICLE_YEAR: i32 = 1900;

/// Upper bound on a single WAL record payload; replay treats anything larger
/// as corruption.
pub const MAX_WAL_RECORD_LEN: usize = 1 << 20;
