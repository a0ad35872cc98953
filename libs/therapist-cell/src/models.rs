use chrono::NaiveDate;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_utils::dates::DayKey;

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

/// Occupancy of one day across the summarized therapists.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub booked_slots: usize,
    pub total_available_slots: usize,
    pub limited_booked_slots: usize,
    pub total_limited_available_slots: usize,
    /// therapist display id -> booked slot ids, catalog order.
    #[serde(rename = "BookedSlots")]
    pub booked_by_therapist: BTreeMap<String, Vec<String>>,
    /// therapist display id -> slot ids taken out by a holiday.
    #[serde(rename = "HolidaySlots")]
    pub holiday_by_therapist: BTreeMap<String, Vec<String>>,
}

impl DaySummary {
    pub fn is_booked(&self, display_id: &str, slot_id: &str) -> bool {
        self.booked_by_therapist
            .get(display_id)
            .map(|slots| slots.iter().any(|s| s == slot_id))
            .unwrap_or(false)
    }

    pub fn is_holiday(&self, display_id: &str, slot_id: &str) -> bool {
        self.holiday_by_therapist
            .get(display_id)
            .map(|slots| slots.iter().any(|s| s == slot_id))
            .unwrap_or(false)
    }
}

/// Day-ordered summary, serialized as `{ "DD-MM-YYYY": DaySummary, ... }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvailabilitySummary {
    pub days: Vec<(DayKey, DaySummary)>,
}

impl AvailabilitySummary {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DaySummary> {
        self.days
            .iter()
            .find(|(key, _)| key.iso == date)
            .map(|(_, summary)| summary)
    }

    pub fn day_by_display(&self, display: &str) -> Option<&DaySummary> {
        self.days
            .iter()
            .find(|(key, _)| key.display == display)
            .map(|(_, summary)| summary)
    }
}

impl Serialize for AvailabilitySummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.days.len()))?;
        for (key, summary) in &self.days {
            map.serialize_entry(&key.display, summary)?;
        }
        map.end()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub therapist_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyAvailabilityQuery {
    pub therapist_id: Option<String>,
    pub month: Option<String>,
    pub year: Option<String>,
}

// ==============================================================================
// HOLIDAY MODELS
// ==============================================================================

/// Full-day form: `{fromDate, toDate}`. Partial form: `{date, slots}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetHolidayRequest {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub date: Option<String>,
    pub slots: Option<Vec<String>>,
    pub reason: Option<String>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid date range: from ({from}) is after to ({to})")]
    InvertedRange { from: NaiveDate, to: NaiveDate },

    #[error("Date range too wide: {days} days requested, at most {max} allowed")]
    RangeTooWide { days: i64, max: u32 },

    #[error("{0}")]
    InvalidMonth(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Store(store) => store.into(),
            other => AppError::ValidationError(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum HolidayError {
    #[error("Therapist not found")]
    TherapistNotFound,

    #[error("{0}")]
    Validation(String),

    #[error("Cannot set holiday. Therapist has active sessions on: {}", dates.join(", "))]
    BlockedDates { dates: Vec<String> },

    #[error("Cannot set holiday for {date}. Slots already booked: {}", labels.join(", "))]
    BlockedSlots { date: String, labels: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<HolidayError> for AppError {
    fn from(err: HolidayError) -> Self {
        match err {
            HolidayError::TherapistNotFound => AppError::NotFound(err.to_string()),
            HolidayError::Validation(msg) => AppError::ValidationError(msg),
            HolidayError::BlockedDates { ref dates } => AppError::ScheduleBlocked {
                details: json!({ "blockedDates": dates }),
                message: err.to_string(),
            },
            HolidayError::BlockedSlots { ref date, ref labels } => AppError::ScheduleBlocked {
                details: json!({ "date": date, "blockedSlots": labels }),
                message: err.to_string(),
            },
            HolidayError::Store(store) => store.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_serializes_in_day_order() {
        let summary = AvailabilitySummary {
            days: vec![
                (DayKey::new(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()), DaySummary::default()),
                (DayKey::new(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()), DaySummary::default()),
            ],
        };
        let raw = serde_json::to_string(&summary).unwrap();
        assert!(raw.find("30-06-2024").unwrap() < raw.find("01-07-2024").unwrap());
        assert!(raw.contains("\"BookedSlots\":{}"));
        assert!(raw.contains("\"totalLimitedAvailableSlots\":0"));
    }

    #[test]
    fn test_blocked_dates_maps_to_schedule_blocked() {
        let err: AppError = HolidayError::BlockedDates { dates: vec!["2024-06-10".into()] }.into();
        match err {
            AppError::ScheduleBlocked { message, details } => {
                assert!(message.contains("2024-06-10"));
                assert_eq!(details["blockedDates"][0], "2024-06-10");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
