use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::Schedule;

use super::EngineError;

pub(crate) fn validate_purpose(purpose: &str) -> Result<(), EngineError> {
    if purpose.trim().is_empty() {
        return Err(EngineError::Validation("purpose must not be empty".into()));
    }
    if purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(())
}

/// Custom slot windows must be forward intervals within one day.
pub(crate) fn validate_window(start: NaiveTime, end: NaiveTime) -> Result<(), EngineError> {
    if start >= end {
        return Err(EngineError::Validation(format!(
            "slot start {start} must be before end {end}"
        )));
    }
    Ok(())
}

/// True iff a blocking booking already occupies (date, slot) on this
/// schedule. Rejected and cancelled bookings free the triple; completed
/// bookings hold it forever. Callers must hold the schedule write lock
/// across this check and any insert that depends on it.
pub(crate) fn has_conflict(schedule: &Schedule, date: NaiveDate, slot_id: Ulid) -> bool {
    schedule
        .bookings
        .iter()
        .any(|b| b.date == date && b.slot_id == slot_id && b.status.is_blocking())
}

pub(crate) fn check_no_conflict(
    schedule: &Schedule,
    date: NaiveDate,
    slot_id: Ulid,
) -> Result<(), EngineError> {
    if has_conflict(schedule, date, slot_id) {
        return Err(EngineError::Conflict(format!(
            "slot {slot_id} on {date} is already booked"
        )));
    }
    Ok(())
}
