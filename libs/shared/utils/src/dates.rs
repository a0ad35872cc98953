use chrono::{Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;

pub const ISO_FORMAT: &str = "%Y-%m-%d";
pub const DISPLAY_FORMAT: &str = "%d-%m-%Y";

/// A calendar day in both encodings: `iso` for lookups, `display` ("DD-MM-YYYY") for responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DayKey {
    pub iso: NaiveDate,
    pub display: String,
}

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            iso: date,
            display: format_display(date),
        }
    }

    pub fn iso_string(&self) -> String {
        self.iso.format(ISO_FORMAT).to_string()
    }
}

/// Inclusive day sequence. Empty when `from > to`.
pub fn day_keys(from: NaiveDate, to: NaiveDate) -> Vec<DayKey> {
    from.iter_days()
        .take_while(|day| *day <= to)
        .map(DayKey::new)
        .collect()
}

/// Accepts "YYYY-MM-DD", optionally followed by a time part ("2024-06-10T00:00:00Z").
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day_part = trimmed.get(..10)?;
    if trimmed.len() > 10 && !trimmed[10..].starts_with(['T', ' ']) {
        return None;
    }
    NaiveDate::parse_from_str(day_part, ISO_FORMAT).ok()
}

pub fn format_display(date: NaiveDate) -> String {
    date.format(DISPLAY_FORMAT).to_string()
}

/// Today's date on the clinic's wall clock.
pub fn clinic_today(utc_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset).date_naive()
}

/// "today .. today + (days - 1)"
pub fn default_window(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let span = i64::from(days.max(1)) - 1;
    (today, today + Duration::days(span))
}

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next_first - Duration::days(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, ISO_FORMAT).unwrap()
    }

    #[test]
    fn test_day_keys_inclusive() {
        let keys = day_keys(date("2024-06-10"), date("2024-06-12"));
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].display, "10-06-2024");
        assert_eq!(keys[2].iso_string(), "2024-06-12");
        assert!(day_keys(date("2024-06-12"), date("2024-06-10")).is_empty());
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(parse_iso_date("2024-06-10"), Some(date("2024-06-10")));
        assert_eq!(parse_iso_date("2024-06-10T05:30:00.000Z"), Some(date("2024-06-10")));
        assert_eq!(parse_iso_date("10-06-2024"), None);
        assert_eq!(parse_iso_date("2024-13-01"), None);
        assert_eq!(parse_iso_date("2024-06-1"), None);
        assert_eq!(parse_iso_date("2024-06-10xyz"), None);
    }

    #[test]
    fn test_default_window_is_fourteen_days() {
        let (from, to) = default_window(date("2024-06-10"), 14);
        assert_eq!(from, date("2024-06-10"));
        assert_eq!(to, date("2024-06-23"));
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_bounds(2024, 2), Some((date("2024-02-01"), date("2024-02-29"))));
        assert_eq!(month_bounds(2024, 12), Some((date("2024-12-01"), date("2024-12-31"))));
        assert_eq!(month_bounds(2024, 13), None);
    }
}
