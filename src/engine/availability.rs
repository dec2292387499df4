use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Schedule, SlotAvailability, TimeSlot};

use super::conflict::has_conflict;
use super::{Engine, EngineError};

/// The availability grid for one (resource, date): every active slot, with
/// `available` computed against the blocking bookings on the schedule.
/// Custom (inactive) slots are not part of the grid even though they are
/// bookable by id.
pub fn availability_grid(
    active_slots: &[TimeSlot],
    schedule: &Schedule,
    date: NaiveDate,
) -> Vec<SlotAvailability> {
    active_slots
        .iter()
        .map(|slot| SlotAvailability {
            slot_id: slot.id,
            label: slot.label.clone(),
            start: slot.start,
            end: slot.end,
            available: !has_conflict(schedule, date, slot.id),
        })
        .collect()
}

impl Engine {
    /// Read-only derived view; slot order follows the active catalog (start
    /// time ascending).
    pub async fn list_availability(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let active = self.list_active_slots().await;
        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = sched.read().await;
        Ok(availability_grid(&active, &guard, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, Resource, ResourceStatus};
    use chrono::{NaiveTime, Utc};

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn slot(start: u32, end: u32) -> TimeSlot {
        TimeSlot {
            id: Ulid::new(),
            label: format!("{start:02}:00-{end:02}:00"),
            start: t(start),
            end: t(end),
            active: true,
        }
    }

    fn schedule_with(bookings: Vec<(Ulid, NaiveDate, BookingStatus)>) -> Schedule {
        let resource = Resource {
            id: Ulid::new(),
            name: "Ground A".into(),
            category: "ground".into(),
            capacity: 30,
            location: "North".into(),
            status: ResourceStatus::Available,
        };
        let rid = resource.id;
        let mut sched = Schedule::new(resource);
        for (slot_id, date, status) in bookings {
            sched.bookings.push(Booking {
                id: Ulid::new(),
                resource_id: rid,
                user: "carol".into(),
                slot_id,
                date,
                purpose: "practice".into(),
                status,
                created_at: Utc::now(),
                approved_by: None,
                approved_at: None,
                rejected_by: None,
                rejected_at: None,
                rejection_reason: None,
                cancelled_at: None,
            });
        }
        sched
    }

    #[test]
    fn empty_schedule_is_fully_available() {
        let slots = vec![slot(8, 10), slot(10, 12)];
        let sched = schedule_with(vec![]);
        let grid = availability_grid(&slots, &sched, d(10));
        assert_eq!(grid.len(), 2);
        assert!(grid.iter().all(|s| s.available));
    }

    #[test]
    fn blocking_statuses_occupy_their_slot_only() {
        let slots = vec![slot(8, 10), slot(10, 12)];
        let sched = schedule_with(vec![(slots[0].id, d(10), BookingStatus::Pending)]);
        let grid = availability_grid(&slots, &sched, d(10));
        assert!(!grid[0].available);
        assert!(grid[1].available);
    }

    #[test]
    fn completed_still_blocks_but_rejected_and_cancelled_free() {
        let slots = vec![slot(8, 10), slot(10, 12), slot(12, 14)];
        let sched = schedule_with(vec![
            (slots[0].id, d(10), BookingStatus::Completed),
            (slots[1].id, d(10), BookingStatus::Rejected),
            (slots[2].id, d(10), BookingStatus::Cancelled),
        ]);
        let grid = availability_grid(&slots, &sched, d(10));
        assert!(!grid[0].available);
        assert!(grid[1].available);
        assert!(grid[2].available);
    }

    #[test]
    fn other_dates_do_not_interfere() {
        let slots = vec![slot(8, 10)];
        let sched = schedule_with(vec![(slots[0].id, d(10), BookingStatus::Approved)]);
        let grid = availability_grid(&slots, &sched, d(11));
        assert!(grid[0].available);
    }
}
