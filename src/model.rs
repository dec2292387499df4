use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Who is acting. Resolved by the auth layer from the connection login and
/// passed explicitly into every engine call — the engine never consults
/// ambient session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self { name: name.into(), role }
    }

    pub fn owns(&self, booking: &Booking) -> bool {
        self.name == booking.user
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Faculty,
    User,
    Public,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "faculty" => Some(Self::Faculty),
            "user" => Some(Self::User),
            "public" => Some(Self::Public),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Faculty => "faculty",
            Self::User => "user",
            Self::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Available,
    Maintenance,
    Removed,
}

impl ResourceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "maintenance" => Some(Self::Maintenance),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Maintenance => "maintenance",
            Self::Removed => "removed",
        }
    }
}

/// Booking status — a closed state machine. Edges:
/// pending → approved | rejected | cancelled,
/// approved → completed | cancelled; everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// A blocking booking occupies its (resource, date, slot) triple against
    /// new bookings. Completed bookings block permanently — the slot was used.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Completed)
    }

    /// Does the state machine have an edge from `self` to `target`?
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Cancelled)
                | (Self::Approved, Self::Completed)
                | (Self::Approved, Self::Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub category: String,
    pub capacity: u32,
    pub location: String,
    pub status: ResourceStatus,
}

impl Resource {
    pub fn is_bookable(&self) -> bool {
        self.status == ResourceStatus::Available
    }
}

/// Partial resource update. `None` fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub capacity: Option<u32>,
    pub location: Option<String>,
    pub status: Option<ResourceStatus>,
}

impl ResourcePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.capacity.is_none()
            && self.location.is_none()
            && self.status.is_none()
    }
}

/// A labeled time-of-day window. Presets are `active = true` and show up in
/// the availability grid; ad-hoc custom slots are inserted `active = false`
/// but stay valid booking targets by id. Slots are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub label: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub active: bool,
}

/// How a booking request names its slot: an existing slot id, or an ad-hoc
/// window resolved through the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRef {
    Preset(Ulid),
    Custom {
        label: String,
        start: NaiveTime,
        end: NaiveTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user: String,
    pub slot_id: Ulid,
    pub date: NaiveDate,
    pub purpose: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Post-use report attached 1:1 to a booking. Consumed by reporting; the
/// engine exposes only its existence on listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub booking_id: Ulid,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub remarks: String,
    pub issues: Option<String>,
}

/// Per-resource state: the resource itself plus every booking ever made on
/// it, in creation order. Guarded by one `RwLock` — the conflict check and
/// the insert happen under the same write lock.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub resource: Resource,
    pub bookings: Vec<Booking>,
    pub usage: HashMap<Ulid, UsageRecord>,
}

impl Schedule {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            bookings: Vec::new(),
            usage: HashMap::new(),
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn has_usage(&self, booking_id: Ulid) -> bool {
        self.usage.contains_key(&booking_id)
    }

    /// Any booking still holding the resource against deletion?
    pub fn has_active_bookings(&self) -> bool {
        self.bookings
            .iter()
            .any(|b| matches!(b.status, BookingStatus::Pending | BookingStatus::Approved))
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: String,
        category: String,
        capacity: u32,
        location: String,
    },
    ResourceUpdated {
        id: Ulid,
        patch: ResourcePatch,
    },
    ResourceDeleted {
        id: Ulid,
    },
    SlotCreated {
        id: Ulid,
        label: String,
        start: NaiveTime,
        end: NaiveTime,
        active: bool,
    },
    BookingCreated {
        id: Ulid,
        resource_id: Ulid,
        user: String,
        slot_id: Ulid,
        date: NaiveDate,
        purpose: String,
        created_at: DateTime<Utc>,
    },
    BookingApproved {
        id: Ulid,
        by: String,
        at: DateTime<Utc>,
    },
    BookingRejected {
        id: Ulid,
        by: String,
        at: DateTime<Utc>,
        reason: Option<String>,
    },
    BookingCompleted {
        id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        at: DateTime<Utc>,
    },
    UsageRecorded {
        booking_id: Ulid,
        by: String,
        at: DateTime<Utc>,
        remarks: String,
        issues: Option<String>,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One row of the availability grid for a (resource, date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAvailability {
    pub slot_id: Ulid,
    pub label: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub available: bool,
}

/// Booking listing filters. All fields optional; the engine narrows the
/// scope by actor role before applying them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub user: Option<String>,
    pub resource_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// A booking plus fields derived at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub booking: Booking,
    pub has_usage: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_resources: usize,
    pub available_resources: usize,
    pub bookings_on_date: usize,
    pub pending_approvals: usize,
    pub completed_this_month: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(status: ResourceStatus) -> Resource {
        Resource {
            id: Ulid::new(),
            name: "Main Court".into(),
            category: "court".into(),
            capacity: 20,
            location: "Block A".into(),
            status,
        }
    }

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            user: "carol".into(),
            slot_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            purpose: "practice".into(),
            status,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn blocking_set() {
        assert!(BookingStatus::Pending.is_blocking());
        assert!(BookingStatus::Approved.is_blocking());
        assert!(BookingStatus::Completed.is_blocking());
        assert!(!BookingStatus::Rejected.is_blocking());
        assert!(!BookingStatus::Cancelled.is_blocking());
    }

    #[test]
    fn transition_edges() {
        use BookingStatus::*;
        let all = [Pending, Approved, Rejected, Completed, Cancelled];
        let legal = [
            (Pending, Approved),
            (Pending, Rejected),
            (Pending, Cancelled),
            (Approved, Completed),
            (Approved, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use BookingStatus::*;
        for from in [Rejected, Completed, Cancelled] {
            for to in [Pending, Approved, Rejected, Completed, Cancelled] {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn status_string_roundtrip() {
        use BookingStatus::*;
        for s in [Pending, Approved, Rejected, Completed, Cancelled] {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("done"), None);
    }

    #[test]
    fn enums_serialize_lowercase() {
        // as_str and the serde rename must agree — both feed external surfaces
        assert_eq!(
            serde_json::to_string(&BookingStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(serde_json::to_string(&Role::Faculty).unwrap(), "\"faculty\"");
        assert_eq!(
            serde_json::to_string(&ResourceStatus::Maintenance).unwrap(),
            "\"maintenance\""
        );
    }

    #[test]
    fn role_and_resource_status_parse() {
        assert_eq!(Role::parse("faculty"), Some(Role::Faculty));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(
            ResourceStatus::parse("maintenance"),
            Some(ResourceStatus::Maintenance)
        );
        assert_eq!(ResourceStatus::parse(""), None);
    }

    #[test]
    fn bookable_only_when_available() {
        assert!(resource(ResourceStatus::Available).is_bookable());
        assert!(!resource(ResourceStatus::Maintenance).is_bookable());
        assert!(!resource(ResourceStatus::Removed).is_bookable());
    }

    #[test]
    fn actor_ownership() {
        let b = booking(BookingStatus::Pending);
        assert!(Actor::new("carol", Role::User).owns(&b));
        assert!(!Actor::new("mallory", Role::User).owns(&b));
    }

    #[test]
    fn schedule_lookup_and_active_check() {
        let mut sched = Schedule::new(resource(ResourceStatus::Available));
        let b = booking(BookingStatus::Pending);
        let id = b.id;
        sched.bookings.push(b);
        assert!(sched.booking(id).is_some());
        assert!(sched.booking(Ulid::new()).is_none());
        assert!(sched.has_active_bookings());

        sched.booking_mut(id).unwrap().status = BookingStatus::Rejected;
        assert!(!sched.has_active_bookings());
    }

    #[test]
    fn patch_emptiness() {
        assert!(ResourcePatch::default().is_empty());
        let p = ResourcePatch {
            capacity: Some(40),
            ..Default::default()
        };
        assert!(!p.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            user: "carol".into(),
            slot_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            purpose: "seminar".into(),
            created_at: Utc::now(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn patch_event_roundtrip() {
        let event = Event::ResourceUpdated {
            id: Ulid::new(),
            patch: ResourcePatch {
                status: Some(ResourceStatus::Maintenance),
                ..Default::default()
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        assert_eq!(bincode::deserialize::<Event>(&bytes).unwrap(), event);
    }
}
