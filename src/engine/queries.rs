use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::policy::{self, ListingScope};
use super::{Engine, EngineError, SharedSchedule};

impl Engine {
    pub async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        let sched = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let guard = sched.read().await;
        Ok(guard.resource.clone())
    }

    /// All resources, name order.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut out = Vec::with_capacity(self.state.len());
        let scheds: Vec<SharedSchedule> =
            self.state.iter().map(|e| e.value().clone()).collect();
        for sched in scheds {
            let guard = sched.read().await;
            out.push(guard.resource.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Bookings visible to `actor`, narrowed by role scope first, then by
    /// the filter; ordered by date descending, slot start time ascending.
    pub async fn list_bookings(&self, actor: &Actor, filter: &BookingFilter) -> Vec<BookingView> {
        let scope = policy::listing_scope(actor);

        let slot_starts: HashMap<Ulid, NaiveTime> = {
            let catalog = self.catalog.read().await;
            catalog.iter().map(|s| (s.id, s.start)).collect()
        };

        let scheds: Vec<SharedSchedule> = match filter.resource_id {
            Some(rid) => self.get_schedule(&rid).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for sched in scheds {
            let guard = sched.read().await;
            for b in &guard.bookings {
                if let ListingScope::OwnedBy(owner) = &scope
                    && &b.user != owner {
                        continue;
                    }
                if filter.user.as_ref().is_some_and(|u| &b.user != u) {
                    continue;
                }
                if filter.status.is_some_and(|s| b.status != s) {
                    continue;
                }
                if filter.date.is_some_and(|d| b.date != d) {
                    continue;
                }
                if filter.from.is_some_and(|d| b.date < d) {
                    continue;
                }
                if filter.to.is_some_and(|d| b.date > d) {
                    continue;
                }
                out.push(BookingView {
                    has_usage: guard.has_usage(b.id),
                    booking: b.clone(),
                });
            }
        }

        out.sort_by(|a, b| {
            b.booking
                .date
                .cmp(&a.booking.date)
                .then_with(|| {
                    let sa = slot_starts.get(&a.booking.slot_id);
                    let sb = slot_starts.get(&b.booking.slot_id);
                    sa.cmp(&sb)
                })
                .then(a.booking.id.cmp(&b.booking.id))
        });
        out
    }

    /// Dashboard counters, relative to `today`.
    pub async fn stats(&self, today: NaiveDate) -> Stats {
        let month_start = today.with_day(1).unwrap_or(today);

        let mut stats = Stats {
            total_resources: 0,
            available_resources: 0,
            bookings_on_date: 0,
            pending_approvals: 0,
            completed_this_month: 0,
        };

        let scheds: Vec<SharedSchedule> =
            self.state.iter().map(|e| e.value().clone()).collect();
        for sched in scheds {
            let guard = sched.read().await;
            stats.total_resources += 1;
            if guard.resource.status == ResourceStatus::Available {
                stats.available_resources += 1;
            }
            for b in &guard.bookings {
                if b.date == today {
                    stats.bookings_on_date += 1;
                }
                if b.status == BookingStatus::Pending {
                    stats.pending_approvals += 1;
                }
                if b.status == BookingStatus::Completed && b.date >= month_start {
                    stats.completed_this_month += 1;
                }
            }
        }
        stats
    }
}
