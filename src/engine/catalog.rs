//! The slot catalog: reusable preset windows plus ad-hoc custom windows
//! created at booking time. Slots are append-only; the active flag decides
//! whether a slot appears in the generic availability grid.

use chrono::NaiveTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::{Actor, Event, TimeSlot};

use super::conflict::validate_window;
use super::{policy, Engine, EngineError};

#[derive(Debug, Default)]
pub struct SlotCatalog {
    slots: Vec<TimeSlot>,
}

impl SlotCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: Ulid) -> Option<&TimeSlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Any slot — preset or custom — covering exactly this window.
    pub fn find_window(&self, start: NaiveTime, end: NaiveTime) -> Option<&TimeSlot> {
        self.slots.iter().find(|s| s.start == start && s.end == end)
    }

    /// Active slots ordered by start time. Custom (inactive) slots never
    /// appear here even though they are bookable by id.
    pub fn active_sorted(&self) -> Vec<TimeSlot> {
        let mut active: Vec<TimeSlot> =
            self.slots.iter().filter(|s| s.active).cloned().collect();
        active.sort_by_key(|s| s.start);
        active
    }

    pub fn insert(&mut self, slot: TimeSlot) {
        self.slots.push(slot);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.iter()
    }
}

/// Label for an unlabelled custom window, e.g. "09:00-11:00".
pub(super) fn derive_label(start: NaiveTime, end: NaiveTime) -> String {
    format!("{}-{}", start.format("%H:%M"), end.format("%H:%M"))
}

impl Engine {
    /// Insert a preset slot (admin only). Presets are active and show up in
    /// the availability grid.
    pub async fn create_slot(
        &self,
        actor: &Actor,
        id: Ulid,
        label: String,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<TimeSlot, EngineError> {
        policy::require_admin(actor)?;
        validate_window(start, end)?;
        if label.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("slot label too long"));
        }

        let mut catalog = self.catalog.write().await;
        if catalog.len() >= MAX_SLOTS_PER_SITE {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if catalog.get(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(existing) = catalog.find_window(start, end) {
            // One slot per window: the grid and the custom path must resolve
            // a window to the same id.
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let label = if label.trim().is_empty() {
            derive_label(start, end)
        } else {
            label
        };
        let slot = TimeSlot { id, label, start, end, active: true };
        self.wal_append(&Event::SlotCreated {
            id: slot.id,
            label: slot.label.clone(),
            start: slot.start,
            end: slot.end,
            active: true,
        })
        .await?;
        catalog.insert(slot.clone());
        Ok(slot)
    }

    /// Active slots ordered by start time.
    pub async fn list_active_slots(&self) -> Vec<TimeSlot> {
        self.catalog.read().await.active_sorted()
    }

    /// Resolve an ad-hoc window to a slot id, creating an inactive slot on
    /// first sight. Idempotent: identical windows always yield the same id,
    /// so repeated custom requests never proliferate slots. Runs under the
    /// catalog write lock so two concurrent identical requests agree.
    pub async fn resolve_or_create_custom_slot(
        &self,
        label: String,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<TimeSlot, EngineError> {
        validate_window(start, end)?;
        if label.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("slot label too long"));
        }

        let mut catalog = self.catalog.write().await;
        if let Some(existing) = catalog.find_window(start, end) {
            return Ok(existing.clone());
        }
        if catalog.len() >= MAX_SLOTS_PER_SITE {
            return Err(EngineError::LimitExceeded("too many slots"));
        }

        let label = if label.trim().is_empty() {
            derive_label(start, end)
        } else {
            label
        };
        let slot = TimeSlot {
            id: Ulid::new(),
            label,
            start,
            end,
            active: false,
        };
        self.wal_append(&Event::SlotCreated {
            id: slot.id,
            label: slot.label.clone(),
            start: slot.start,
            end: slot.end,
            active: false,
        })
        .await?;
        catalog.insert(slot.clone());
        Ok(slot)
    }
}
