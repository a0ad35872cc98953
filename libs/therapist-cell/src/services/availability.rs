use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use shared_database::{AppState, SchedulingStore};
use shared_models::scheduling::Therapist;
use shared_models::slots::SlotCatalog;
use shared_utils::dates::{self, DayKey};

use crate::models::{AvailabilityError, AvailabilitySummary, DaySummary};

/// Per-day occupancy across therapists, joined from the slot catalog, holiday
/// records and the session ledger. Read-only; safe to call concurrently.
pub struct AvailabilitySummarizer {
    store: Arc<dyn SchedulingStore>,
    catalog: &'static SlotCatalog,
    max_range_days: u32,
}

impl AvailabilitySummarizer {
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

    /// Summarizes every active therapist, or only the one matching `therapist_filter`
    /// (internal or display id). An unknown filter yields an empty summary.
    pub async fn summarize(
        &self,
        therapist_filter: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AvailabilitySummary, AvailabilityError> {
        check_range(from, to)?;
        let days = (to - from).num_days() + 1;
        if days > i64::from(self.max_range_days) {
            return Err(AvailabilityError::RangeTooWide { days, max: self.max_range_days });
        }

        let mut therapists = self.store.list_therapists(true).await?;
        if let Some(reference) = therapist_filter {
            therapists.retain(|therapist| therapist.matches(reference));
            if therapists.is_empty() {
                info!("No active therapist matches '{}', returning empty summary", reference);
                return Ok(AvailabilitySummary::empty());
            }
        }

        self.summarize_therapists(&therapists, from, to).await
    }

    /// Summary for a calendar month; `month` is 1-12.
    pub async fn summarize_month(
        &self,
        therapist_filter: Option<&str>,
        month: u32,
        year: i32,
    ) -> Result<AvailabilitySummary, AvailabilityError> {
        let (from, to) = dates::month_bounds(year, month).ok_or_else(|| {
            AvailabilityError::InvalidMonth(format!("Invalid month/year: {}/{}", month, year))
        })?;
        self.summarize(therapist_filter, from, to).await
    }

    /// Core join over an explicit therapist set.
    pub async fn summarize_therapists(
        &self,
        therapists: &[Therapist],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AvailabilitySummary, AvailabilityError> {
        check_range(from, to)?;
        self.summarize_days(therapists, from, to, dates::day_keys(from, to)).await
    }

    /// Like `summarize_therapists`, but only the given dates appear in the
    /// result, however far apart they are.
    pub async fn summarize_dates(
        &self,
        therapists: &[Therapist],
        days: &BTreeSet<NaiveDate>,
    ) -> Result<AvailabilitySummary, AvailabilityError> {
        let (Some(&from), Some(&to)) = (days.first(), days.last()) else {
            return Ok(AvailabilitySummary::empty());
        };
        let keys = days.iter().copied().map(DayKey::new).collect();
        self.summarize_days(therapists, from, to, keys).await
    }

    async fn summarize_days(
        &self,
        therapists: &[Therapist],
        from: NaiveDate,
        to: NaiveDate,
        keys: Vec<DayKey>,
    ) -> Result<AvailabilitySummary, AvailabilityError> {
        if therapists.is_empty() {
            return Ok(AvailabilitySummary::empty());
        }

        let ids: Vec<_> = therapists.iter().map(|t| t.id).collect();
        let entries = self.store.sessions_in_range(&ids, from, to).await?;
        debug!(
            "Summarizing {} therapist(s) from {} to {} over {} ledger entries",
            therapists.len(),
            from,
            to,
            entries.len()
        );

        let display_ids: HashMap<_, _> = therapists
            .iter()
            .map(|t| (t.id, t.display_id.as_str()))
            .collect();

        // date -> display id -> slot ids
        let mut booked: HashMap<NaiveDate, BTreeMap<&str, Vec<String>>> = HashMap::new();
        for entry in entries.iter().filter(|e| e.status.is_active()) {
            let Some(display_id) = display_ids.get(&entry.therapist_id) else {
                continue;
            };
            let slots = booked.entry(entry.date).or_default().entry(*display_id).or_default();
            if !slots.contains(&entry.slot_id) {
                slots.push(entry.slot_id.clone());
            }
        }

        let days = keys
            .into_iter()
            .map(|day| {
                let summary = self.summarize_day(therapists, &day, booked.get(&day.iso));
                (day, summary)
            })
            .collect();

        Ok(AvailabilitySummary { days })
    }

    fn summarize_day(
        &self,
        therapists: &[Therapist],
        day: &DayKey,
        booked: Option<&BTreeMap<&str, Vec<String>>>,
    ) -> DaySummary {
        let mut summary = DaySummary::default();
        let mut eligible = 0;

        for therapist in therapists {
            let slots = booked.and_then(|by_therapist| by_therapist.get(therapist.display_id.as_str()));
            if let Some(slots) = slots {
                summary
                    .booked_by_therapist
                    .insert(therapist.display_id.clone(), self.in_catalog_order(slots));
            }

            // Any holiday record takes the therapist out of the day's capacity.
            if let Some(holiday) = therapist.holiday_on(day.iso) {
                summary
                    .holiday_by_therapist
                    .insert(therapist.display_id.clone(), holiday.blocked_slot_ids(self.catalog));
                continue;
            }

            eligible += 1;
            for slot_id in slots.into_iter().flatten() {
                if self.catalog.is_limited(slot_id) {
                    summary.limited_booked_slots += 1;
                } else {
                    summary.booked_slots += 1;
                }
            }
        }

        summary.total_available_slots = eligible * self.catalog.normal_count();
        summary.total_limited_available_slots = eligible * self.catalog.limited_count();
        summary
    }

    fn in_catalog_order(&self, slots: &[String]) -> Vec<String> {
        let position = |slot_id: &str| {
            self.catalog
                .all_slots()
                .iter()
                .position(|s| s.slot_id == slot_id)
                .unwrap_or(usize::MAX)
        };
        let mut ordered = slots.to_vec();
        ordered.sort_by_key(|slot_id| position(slot_id.as_str()));
        ordered
    }
}

fn check_range(from: NaiveDate, to: NaiveDate) -> Result<(), AvailabilityError> {
    if from > to {
        return Err(AvailabilityError::InvertedRange { from, to });
    }
    Ok(())
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|raw| !raw.is_empty())
}

/// Turns raw `from`/`to` query values into a window. Unless both are given the
/// default window starting today is used.
pub fn resolve_window(
    from: Option<&str>,
    to: Option<&str>,
    today: NaiveDate,
    window_days: u32,
) -> Result<(NaiveDate, NaiveDate), AvailabilityError> {
    match (non_empty(from), non_empty(to)) {
        (Some(from), Some(to)) => {
            let from_date = dates::parse_iso_date(from)
                .ok_or_else(|| AvailabilityError::InvalidDate(from.to_string()))?;
            let to_date = dates::parse_iso_date(to)
                .ok_or_else(|| AvailabilityError::InvalidDate(to.to_string()))?;
            check_range(from_date, to_date)?;
            Ok((from_date, to_date))
        }
        _ => Ok(dates::default_window(today, window_days)),
    }
}

/// Parses `month`/`year` query values.
pub fn parse_month(month: Option<&str>, year: Option<&str>) -> Result<(u32, i32), AvailabilityError> {
    let month = month
        .and_then(|m| m.trim().parse::<u32>().ok())
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| AvailabilityError::InvalidMonth("Invalid or missing month (1-12 required)".to_string()))?;
    let year = year
        .and_then(|y| y.trim().parse::<i32>().ok())
        .ok_or_else(|| AvailabilityError::InvalidMonth("Invalid or missing year".to_string()))?;
    Ok((month, year))
}
