use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_purpose};
use super::{policy, Engine, EngineError};

impl Engine {
    pub async fn create_resource(
        &self,
        actor: &Actor,
        id: Ulid,
        name: String,
        category: String,
        capacity: u32,
        location: String,
    ) -> Result<Resource, EngineError> {
        policy::require_admin(actor)?;
        if name.trim().is_empty() {
            return Err(EngineError::Validation("resource name must not be empty".into()));
        }
        if name.len() > MAX_NAME_LEN || category.len() > MAX_NAME_LEN || location.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource field too long"));
        }
        if self.state.len() >= MAX_RESOURCES_PER_SITE {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let resource = Resource {
            id,
            name,
            category,
            capacity,
            location,
            status: ResourceStatus::Available,
        };
        let event = Event::ResourceCreated {
            id,
            name: resource.name.clone(),
            category: resource.category.clone(),
            capacity: resource.capacity,
            location: resource.location.clone(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(Schedule::new(resource.clone()))));
        self.notify.send(id, &event);
        Ok(resource)
    }

    /// Partial update: `None` fields keep their previous value, mirroring the
    /// COALESCE semantics of a relational patch.
    pub async fn update_resource(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<Resource, EngineError> {
        policy::require_admin(actor)?;
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(EngineError::Validation("resource name must not be empty".into()));
            }
            if name.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("resource field too long"));
            }
        }
        if patch.category.as_ref().is_some_and(|c| c.len() > MAX_NAME_LEN)
            || patch.location.as_ref().is_some_and(|l| l.len() > MAX_NAME_LEN)
        {
            return Err(EngineError::LimitExceeded("resource field too long"));
        }

        let sched = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = sched.write().await;
        if patch.is_empty() {
            return Ok(guard.resource.clone());
        }
        let event = Event::ResourceUpdated { id, patch };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(guard.resource.clone())
    }

    /// Remove a resource. Vetoed while any booking on it is pending or
    /// approved; rejected/cancelled/completed history goes with it.
    pub async fn delete_resource(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        policy::require_admin(actor)?;
        let sched = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let guard = sched.write().await;
        if guard.has_active_bookings() {
            return Err(EngineError::Conflict(format!(
                "resource {id} has active bookings"
            )));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        // Unmap while still holding the write lock so no transition can
        // slip between the removal steps.
        for b in &guard.bookings {
            self.booking_index.remove(&b.id);
        }
        self.state.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Create a booking in `pending`. The availability of the slot is decided
    /// and the insert applied under one schedule write lock — two concurrent
    /// requests for the same (resource, date, slot) cannot both pass.
    pub async fn create_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        slot: SlotRef,
        purpose: String,
    ) -> Result<Booking, EngineError> {
        validate_purpose(&purpose)?;
        if self.booking_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let slot = match slot {
            SlotRef::Preset(slot_id) => {
                let catalog = self.catalog.read().await;
                catalog
                    .get(slot_id)
                    .cloned()
                    .ok_or(EngineError::NotFound(slot_id))?
            }
            SlotRef::Custom { label, start, end } => {
                self.resolve_or_create_custom_slot(label, start, end).await?
            }
        };

        let sched = self
            .get_schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = sched.write().await;
        // The resource may have been deleted between the map lookup and the
        // lock grant.
        if !self.state.contains_key(&resource_id) {
            return Err(EngineError::NotFound(resource_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        if !guard.resource.is_bookable() {
            return Err(EngineError::ResourceUnavailable(resource_id));
        }
        check_no_conflict(&guard, date, slot.id)?;

        let booking = Booking {
            id,
            resource_id,
            user: actor.name.clone(),
            slot_id: slot.id,
            date,
            purpose,
            status: BookingStatus::Pending,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_at: None,
        };
        let event = Event::BookingCreated {
            id,
            resource_id,
            user: booking.user.clone(),
            slot_id: booking.slot_id,
            date,
            purpose: booking.purpose.clone(),
            created_at: booking.created_at,
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(booking)
    }

    /// Apply a state-machine transition. Edge validity is checked before
    /// authority (an impossible move reads as invalid, not forbidden), and
    /// the whole read-check-write runs under the schedule write lock.
    pub async fn transition(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        target: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("rejection reason too long"));
        }

        let (resource_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let current = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;

        if !current.status.can_transition_to(target) {
            return Err(EngineError::InvalidTransition {
                from: current.status.as_str(),
                to: target.as_str(),
            });
        }
        if !policy::can_transition(actor, current, target) {
            return Err(EngineError::Forbidden(format!(
                "{} may not move booking {booking_id} to {}",
                actor.name,
                target.as_str()
            )));
        }

        let event = match target {
            BookingStatus::Approved => Event::BookingApproved {
                id: booking_id,
                by: actor.name.clone(),
                at: Utc::now(),
            },
            // The reason is stored as given, even when absent.
            BookingStatus::Rejected => Event::BookingRejected {
                id: booking_id,
                by: actor.name.clone(),
                at: Utc::now(),
                reason,
            },
            BookingStatus::Completed => Event::BookingCompleted { id: booking_id },
            BookingStatus::Cancelled => Event::BookingCancelled {
                id: booking_id,
                at: Utc::now(),
            },
            BookingStatus::Pending => unreachable!("no edge re-enters pending"),
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Convenience wrapper: cancel is just a transition to `cancelled`, legal
    /// only from pending or approved.
    pub async fn cancel(&self, actor: &Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(actor, booking_id, BookingStatus::Cancelled, None)
            .await
    }

    /// Attach a one-time usage record to a booking. Staff or the owner only.
    pub async fn record_usage(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        remarks: String,
        issues: Option<String>,
    ) -> Result<UsageRecord, EngineError> {
        if remarks.trim().is_empty() {
            return Err(EngineError::Validation("remarks must not be empty".into()));
        }
        if remarks.len() > MAX_REMARKS_LEN {
            return Err(EngineError::LimitExceeded("remarks too long"));
        }

        let (resource_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !policy::can_record_usage(actor, booking) {
            return Err(EngineError::Forbidden(format!(
                "{} may not report usage for booking {booking_id}",
                actor.name
            )));
        }
        if guard.has_usage(booking_id) {
            return Err(EngineError::Conflict(format!(
                "usage record already submitted for booking {booking_id}"
            )));
        }

        let record = UsageRecord {
            booking_id,
            uploaded_by: actor.name.clone(),
            uploaded_at: Utc::now(),
            remarks,
            issues,
        };
        let event = Event::UsageRecorded {
            booking_id,
            by: record.uploaded_by.clone(),
            at: record.uploaded_at,
            remarks: record.remarks.clone(),
            issues: record.issues.clone(),
        };
        self.persist_and_apply(resource_id, &mut guard, &event).await?;
        Ok(record)
    }
}
