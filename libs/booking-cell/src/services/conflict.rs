use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::scheduling::{OccupancyReason, SessionKey, SlotClash};
use shared_utils::dates;
use therapist_cell::models::AvailabilitySummary;

use crate::models::ConflictItem;

/// A requested session reduced to what conflict detection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedSlot {
    pub key: SessionKey,
    pub therapist_display_id: String,
}

impl RequestedSlot {
    fn conflict(&self, reason: OccupancyReason) -> ConflictItem {
        ConflictItem {
            date: self.key.date.format(dates::ISO_FORMAT).to_string(),
            slot_id: self.key.slot_id.clone(),
            therapist_id: self.key.therapist_id,
            therapist_display_id: self.therapist_display_id.clone(),
            reason,
        }
    }
}

/// Checks requested slots against per-therapist availability snapshots.
pub struct ConflictDetectionService;

impl ConflictDetectionService {
    pub fn new() -> Self {
        Self
    }

    /// Every requested slot that is booked or holiday-blocked, in request order.
    /// Slots in `exempt` (unchanged on update) are never reported.
    pub fn find_conflicts(
        &self,
        requested: &[RequestedSlot],
        availability: &BTreeMap<String, AvailabilitySummary>,
        exempt: &BTreeSet<SessionKey>,
    ) -> Vec<ConflictItem> {
        let conflicts: Vec<ConflictItem> = requested
            .iter()
            .filter(|slot| !exempt.contains(&slot.key))
            .filter_map(|slot| {
                let day = availability
                    .get(&slot.therapist_display_id)
                    .and_then(|summary| summary.day(slot.key.date))?;
                if day.is_booked(&slot.therapist_display_id, &slot.key.slot_id) {
                    Some(slot.conflict(OccupancyReason::Booked))
                } else if day.is_holiday(&slot.therapist_display_id, &slot.key.slot_id) {
                    Some(slot.conflict(OccupancyReason::Holiday))
                } else {
                    None
                }
            })
            .collect();

        if conflicts.is_empty() {
            debug!("All {} requested slot(s) are free", requested.len());
        } else {
            warn!("Conflict detected on {} of {} requested slot(s)", conflicts.len(), requested.len());
        }
        conflicts
    }

    /// Translates clashes reported by the store at commit time. A bare index
    /// violation carries no detail, so every candidate is reported then.
    pub fn from_clashes(&self, clashes: &[SlotClash], candidates: &[RequestedSlot]) -> Vec<ConflictItem> {
        if clashes.is_empty() {
            return candidates
                .iter()
                .map(|slot| slot.conflict(OccupancyReason::Booked))
                .collect();
        }
        clashes
            .iter()
            .map(|clash| {
                let display_id = candidates
                    .iter()
                    .find(|slot| slot.key.therapist_id == clash.key.therapist_id)
                    .map(|slot| slot.therapist_display_id.clone())
                    .unwrap_or_default();
                RequestedSlot { key: clash.key.clone(), therapist_display_id: display_id }
                    .conflict(clash.reason)
            })
            .collect()
    }

    /// Distinct requested dates per therapist id.
    pub fn dates_by_therapist(&self, requested: &[RequestedSlot]) -> BTreeMap<Uuid, BTreeSet<NaiveDate>> {
        let mut dates: BTreeMap<Uuid, BTreeSet<NaiveDate>> = BTreeMap::new();
        for slot in requested {
            dates.entry(slot.key.therapist_id).or_default().insert(slot.key.date);
        }
        dates
    }
}

impl Default for ConflictDetectionService {
    fn default() -> Self {
        Self::new()
    }
}
