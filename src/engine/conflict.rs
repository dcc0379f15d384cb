use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// True if any active reservation on this vehicle overlaps `[start, end)`,
/// other than `exclude` (the candidate's own id in the update case).
///
/// Pure read — the caller must already hold at least a read guard on the
/// state, and must hold a write guard for the whole check-then-insert
/// sequence when persisting. Touching endpoints do not overlap.
pub fn has_conflict(vs: &VehicleState, start: Ms, end: Ms, exclude: Option<Ulid>) -> bool {
    // Built without Span::new: ordering is validated separately and a
    // reversed candidate range must still be scannable.
    let query = Span { start, end };
    vs.overlapping(&query)
        .any(|r| r.status.is_active() && Some(r.id) != exclude)
}

/// Sanity bounds on candidate timestamps, checked before field validation.
pub(super) fn validate_bounds(
    start: Option<Ms>,
    end: Option<Ms>,
) -> Result<(), EngineError> {
    for t in [start, end].into_iter().flatten() {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
    }
    if let (Some(s), Some(e)) = (start, end)
        && e - s > MAX_RESERVATION_DURATION_MS
    {
        return Err(EngineError::LimitExceeded("reservation window too wide"));
    }
    Ok(())
}
