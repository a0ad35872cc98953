use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use shared_database::{AppState, SchedulingStore, StoreError};
use shared_models::scheduling::{Holiday, HolidaySlot, Therapist};
use shared_models::slots::SlotCatalog;
use shared_utils::dates;

use crate::models::{HolidayError, SetHolidayRequest};

pub struct HolidayService {
    store: Arc<dyn SchedulingStore>,
    catalog: &'static SlotCatalog,
    max_range_days: u32,
}

impl HolidayService {
    pub fn new(store: Arc<dyn SchedulingStore>, catalog: &'static SlotCatalog, max_range_days: u32) -> Self {
        Self { store, catalog, max_range_days }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            SlotCatalog::standard(),
            state.config.availability_max_range_days,
        )
    }

    /// Dispatches the request body to the full-day or partial form.
    pub async fn set_holidays(
        &self,
        therapist_ref: &str,
        request: SetHolidayRequest,
    ) -> Result<Vec<Holiday>, HolidayError> {
        let reason = request.reason.unwrap_or_default();

        match (request.date, request.slots) {
            (Some(date), Some(slots)) => {
                let date = parse_day(&date)?;
                self.set_partial_holiday(therapist_ref, date, &slots, reason).await
            }
            (None, Some(_)) => Err(HolidayError::Validation(
                "date is required when slots are given".to_string(),
            )),
            _ => {
                let (Some(from), Some(to)) = (request.from_date, request.to_date) else {
                    return Err(HolidayError::Validation(
                        "fromDate and toDate are required".to_string(),
                    ));
                };
                let from = parse_day(&from)?;
                let to = parse_day(&to)?;
                self.set_full_day_holiday(therapist_ref, from, to, reason).await
            }
        }
    }

    /// Blocks every day in `from..=to`. Refused as a whole when any day holds an active session.
    pub async fn set_full_day_holiday(
        &self,
        therapist_ref: &str,
        from: NaiveDate,
        to: NaiveDate,
        reason: String,
    ) -> Result<Vec<Holiday>, HolidayError> {
        if from > to {
            return Err(HolidayError::Validation(
                "fromDate cannot be after toDate".to_string(),
            ));
        }
        let days = (to - from).num_days() + 1;
        if days > i64::from(self.max_range_days) {
            return Err(HolidayError::Validation(format!(
                "Holiday range of {} days exceeds the maximum of {} days",
                days, self.max_range_days
            )));
        }
        let therapist = self.resolve_therapist(therapist_ref).await?;
        debug!("Setting full-day holiday for {} from {} to {}", therapist.display_id, from, to);

        let busy: BTreeSet<NaiveDate> = self
            .store
            .sessions_in_range(&[therapist.id], from, to)
            .await?
            .into_iter()
            .filter(|entry| entry.status.is_active())
            .map(|entry| entry.date)
            .collect();
        if !busy.is_empty() {
            return Err(blocked_dates(busy));
        }

        let holidays = dates::day_keys(from, to)
            .into_iter()
            .map(|day| Holiday::full_day(day.iso, reason.clone()))
            .collect();

        let updated = self
            .store
            .upsert_holidays(therapist.id, holidays)
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { conflicts } => {
                    warn!("Holiday for {} lost a race with a booking", therapist.display_id);
                    blocked_dates(conflicts.into_iter().map(|c| c.key.date).collect())
                }
                other => other.into(),
            })?;

        info!("Full-day holiday set for {} ({} to {})", updated.display_id, from, to);
        Ok(updated.holidays)
    }

    /// Blocks individual slots on one day. Unknown slot ids are dropped.
    pub async fn set_partial_holiday(
        &self,
        therapist_ref: &str,
        date: NaiveDate,
        slot_ids: &[String],
        reason: String,
    ) -> Result<Vec<Holiday>, HolidayError> {
        let slots: Vec<HolidaySlot> = slot_ids
            .iter()
            .filter_map(|slot_id| self.catalog.get(slot_id))
            .map(|slot| HolidaySlot { slot_id: slot.slot_id.clone(), label: slot.label.clone() })
            .fold(Vec::new(), |mut acc, slot| {
                if !acc.contains(&slot) {
                    acc.push(slot);
                }
                acc
            });
        if slots.is_empty() {
            return Err(HolidayError::Validation(
                "No valid slots given for partial holiday".to_string(),
            ));
        }

        let therapist = self.resolve_therapist(therapist_ref).await?;
        debug!(
            "Setting partial holiday for {} on {} ({} slots)",
            therapist.display_id,
            date,
            slots.len()
        );

        let busy: BTreeSet<String> = self
            .store
            .sessions_in_range(&[therapist.id], date, date)
            .await?
            .into_iter()
            .filter(|entry| entry.status.is_active())
            .filter(|entry| slots.iter().any(|slot| slot.slot_id == entry.slot_id))
            .map(|entry| entry.slot_id)
            .collect();
        if !busy.is_empty() {
            return Err(self.blocked_slots(date, busy));
        }

        let updated = self
            .store
            .upsert_holidays(therapist.id, vec![Holiday::partial(date, slots, reason)])
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { conflicts } => {
                    warn!("Partial holiday for {} lost a race with a booking", therapist.display_id);
                    self.blocked_slots(date, conflicts.into_iter().map(|c| c.key.slot_id).collect())
                }
                other => other.into(),
            })?;

        info!("Partial holiday set for {} on {}", updated.display_id, date);
        Ok(updated.holidays)
    }

    pub async fn list_holidays(&self, therapist_ref: &str) -> Result<Vec<Holiday>, HolidayError> {
        Ok(self.resolve_therapist(therapist_ref).await?.holidays)
    }

    async fn resolve_therapist(&self, reference: &str) -> Result<Therapist, HolidayError> {
        self.store
            .find_therapist(reference)
            .await?
            .ok_or(HolidayError::TherapistNotFound)
    }

    fn blocked_slots(&self, date: NaiveDate, slot_ids: BTreeSet<String>) -> HolidayError {
        let labels = self
            .catalog
            .all_slots()
            .iter()
            .filter(|slot| slot_ids.contains(&slot.slot_id))
            .map(|slot| slot.label.clone())
            .collect();
        HolidayError::BlockedSlots { date: date.format(dates::ISO_FORMAT).to_string(), labels }
    }
}

fn blocked_dates(days: BTreeSet<NaiveDate>) -> HolidayError {
    HolidayError::BlockedDates {
        dates: days.into_iter().map(|d| d.format(dates::ISO_FORMAT).to_string()).collect(),
    }
}

fn parse_day(raw: &str) -> Result<NaiveDate, HolidayError> {
    dates::parse_iso_date(raw).ok_or_else(|| {
        HolidayError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", raw))
    })
}
