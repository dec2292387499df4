//! Authorization policy: one pure decision function per concern, keyed on
//! (role, requested transition, ownership). Keeping the matrix in one match
//! keeps it auditable and testable away from the engine.

use crate::model::{Actor, Booking, BookingStatus, Role};

use super::EngineError;

/// May `actor` move `booking` to `target`? Edge validity is checked by the
/// lifecycle engine before this is consulted; this answers authority only.
pub fn can_transition(actor: &Actor, booking: &Booking, target: BookingStatus) -> bool {
    match target {
        // Approval authority is a staff concern; ownership is irrelevant.
        BookingStatus::Approved | BookingStatus::Rejected => {
            matches!(actor.role, Role::Admin | Role::Faculty)
        }
        // Staff may complete anything; a user may close out their own.
        BookingStatus::Completed => {
            matches!(actor.role, Role::Admin | Role::Faculty)
                || (actor.role == Role::User && actor.owns(booking))
        }
        // Owners cancel their own regardless of role; admins cancel any.
        BookingStatus::Cancelled => actor.role == Role::Admin || actor.owns(booking),
        // Nothing re-enters pending.
        BookingStatus::Pending => false,
    }
}

/// Registry and catalog mutations are admin-only.
pub fn require_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!(
            "{} role may not manage resources",
            actor.role.as_str()
        )))
    }
}

/// May `actor` attach a usage record to `booking`?
pub fn can_record_usage(actor: &Actor, booking: &Booking) -> bool {
    matches!(actor.role, Role::Admin | Role::Faculty) || actor.owns(booking)
}

/// What a listing may show the actor. This is a filtering concern applied
/// before results are returned, not a per-record authorization failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingScope {
    All,
    OwnedBy(String),
}

pub fn listing_scope(actor: &Actor) -> ListingScope {
    match actor.role {
        Role::Admin | Role::Faculty => ListingScope::All,
        Role::User | Role::Public => ListingScope::OwnedBy(actor.name.clone()),
    }
}
