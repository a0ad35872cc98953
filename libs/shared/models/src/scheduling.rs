use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::slots::SlotCatalog;

// ==============================================================================
// THERAPISTS & HOLIDAYS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Therapist {
    pub id: Uuid,
    pub display_id: String,
    pub name: String,
    pub is_active: bool,
    #[serde(default)]
    pub holidays: Vec<Holiday>,
}

impl Therapist {
    pub fn holiday_on(&self, date: NaiveDate) -> Option<&Holiday> {
        self.holidays.iter().find(|holiday| holiday.date == date)
    }

    /// Replace the record for the same date, or add it.
    pub fn upsert_holiday(&mut self, holiday: Holiday) {
        match self.holidays.iter_mut().find(|h| h.date == holiday.date) {
            Some(existing) => *existing = holiday,
            None => {
                self.holidays.push(holiday);
                self.holidays.sort_by_key(|h| h.date);
            }
        }
    }

    /// Matches either the internal id or the human display id ("NPL001").
    pub fn matches(&self, reference: &str) -> bool {
        self.display_id == reference || self.id.to_string() == reference
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidaySlot {
    pub slot_id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
    pub date: NaiveDate,
    pub is_full_day: bool,
    #[serde(default)]
    pub slots: Vec<HolidaySlot>,
    #[serde(default)]
    pub reason: String,
}

impl Holiday {
    pub fn full_day(date: NaiveDate, reason: impl Into<String>) -> Self {
        Self {
            date,
            is_full_day: true,
            slots: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn partial(date: NaiveDate, slots: Vec<HolidaySlot>, reason: impl Into<String>) -> Self {
        Self {
            date,
            is_full_day: false,
            slots,
            reason: reason.into(),
        }
    }

    pub fn blocks(&self, slot_id: &str) -> bool {
        self.is_full_day || self.slots.iter().any(|slot| slot.slot_id == slot_id)
    }

    /// Slot ids this record takes out of service, in catalog order.
    pub fn blocked_slot_ids(&self, catalog: &SlotCatalog) -> Vec<String> {
        catalog
            .all_slots()
            .iter()
            .filter(|slot| self.blocks(&slot.slot_id))
            .map(|slot| slot.slot_id.clone())
            .collect()
    }
}

// ==============================================================================
// SESSIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
    CancelledByTherapist,
    Deleted,
}

impl SessionStatus {
    /// Whether a session in this status still occupies its slot.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            SessionStatus::Cancelled | SessionStatus::CancelledByTherapist | SessionStatus::Deleted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::CancelledByTherapist => "cancelledByTherapist",
            SessionStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (date, slot, therapist) triple a session occupies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub date: NaiveDate,
    pub slot_id: String,
    pub therapist_id: Uuid,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.date, self.slot_id, self.therapist_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub date: NaiveDate,
    pub slot_id: String,
    /// Slot label at booking time, e.g. "10:00 to 10:45".
    #[serde(default)]
    pub time: String,
    pub therapist_id: Uuid,
    #[serde(default)]
    pub therapist_display_id: Option<String>,
    #[serde(default)]
    pub therapy_type_id: Option<Uuid>,
    #[serde(default)]
    pub is_checked_in: bool,
    #[serde(default)]
    pub status: SessionStatus,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            date: self.date,
            slot_id: self.slot_id.clone(),
            therapist_id: self.therapist_id,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Flat view of one stored session, as read for occupancy checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub booking_id: Uuid,
    pub session_id: Uuid,
    pub date: NaiveDate,
    pub slot_id: String,
    pub therapist_id: Uuid,
    pub status: SessionStatus,
}

impl LedgerEntry {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            date: self.date,
            slot_id: self.slot_id.clone(),
            therapist_id: self.therapist_id,
        }
    }
}

/// Why a (date, slot, therapist) triple cannot be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyReason {
    Booked,
    Holiday,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotClash {
    pub key: SessionKey,
    pub reason: OccupancyReason,
}

// ==============================================================================
// STATUSES
// ==============================================================================

/// Status of bookings and booking requests. Approved and rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    #[serde(alias = "partiallypaid")]
    PartiallyPaid,
    Paid,
}

// ==============================================================================
// CATALOG ENTITIES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: Uuid,
    pub name: String,
    pub total_cost: f64,
    #[serde(default)]
    pub session_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapyType {
    pub id: Uuid,
    pub name: String,
}

// ==============================================================================
// PAYMENTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub invoice_number: String,
    pub amount: f64,
    #[serde(default)]
    pub amount_paid: f64,
    pub status: PaymentStatus,
    #[serde(default)]
    pub payment_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentCollection {
    Full,
    Partial(f64),
}

#[derive(Error, Debug, PartialEq)]
pub enum PaymentRuleError {
    #[error("Partial amount to pay must be a number > 0 and <= remaining amount ({remaining}).")]
    InvalidPartialAmount { remaining: f64 },
}

impl Payment {
    pub fn remaining(&self) -> f64 {
        (self.amount - self.amount_paid).max(0.0)
    }

    /// Applies a collection and returns the updated record. The caller persists it.
    pub fn apply(&self, collection: PaymentCollection, at: DateTime<Utc>) -> Result<Payment, PaymentRuleError> {
        let mut next = self.clone();
        match collection {
            PaymentCollection::Full => {
                next.amount_paid = next.amount;
                next.status = PaymentStatus::Paid;
            }
            PaymentCollection::Partial(amount) => {
                let remaining = self.remaining();
                if !amount.is_finite() || amount <= 0.0 || amount > remaining {
                    return Err(PaymentRuleError::InvalidPartialAmount { remaining });
                }
                next.amount_paid += amount;
                next.status = if next.amount_paid < next.amount {
                    PaymentStatus::PartiallyPaid
                } else {
                    PaymentStatus::Paid
                };
            }
        }
        next.payment_time = Some(at);
        Ok(next)
    }
}

// ==============================================================================
// BOOKINGS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountInfo {
    pub coupon: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub appointment_id: String,
    pub patient_id: Uuid,
    pub package_id: Uuid,
    pub therapy_id: Uuid,
    pub therapist_id: Uuid,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub payment_id: Option<Uuid>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub discount_info: Option<DiscountInfo>,
    #[serde(default)]
    pub booking_request_id: Option<Uuid>,
    #[serde(default)]
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn active_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|session| session.is_active())
    }
}

/// Booking with its references expanded, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedBooking {
    #[serde(flatten)]
    pub booking: Booking,
    pub patient: Option<Patient>,
    pub package: Option<Package>,
    pub therapy: Option<TherapyType>,
    pub therapist: Option<Therapist>,
    pub payment: Option<Payment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub id: Uuid,
    #[serde(default)]
    pub patient_id: Option<Uuid>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub booking_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn payment(amount: f64, paid: f64) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            invoice_number: "INV-2024-00001".into(),
            amount,
            amount_paid: paid,
            status: PaymentStatus::Pending,
            payment_time: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_status_activity() {
        assert!(SessionStatus::Scheduled.is_active());
        assert!(SessionStatus::Completed.is_active());
        assert!(!SessionStatus::Cancelled.is_active());
        assert!(!SessionStatus::CancelledByTherapist.is_active());
        assert!(!SessionStatus::Deleted.is_active());
    }

    #[test]
    fn test_session_status_wire_names() {
        let status: SessionStatus = serde_json::from_str("\"cancelledByTherapist\"").unwrap();
        assert_eq!(status, SessionStatus::CancelledByTherapist);
    }

    #[test]
    fn test_holiday_blocking() {
        let catalog = SlotCatalog::standard();
        let full = Holiday::full_day(date("2024-06-11"), "");
        assert!(full.blocks("1000-1045"));
        assert_eq!(full.blocked_slot_ids(catalog).len(), 15);

        let partial = Holiday::partial(
            date("2024-06-11"),
            vec![HolidaySlot { slot_id: "1045-1130".into(), label: "10:45 to 11:30".into() }],
            "",
        );
        assert!(partial.blocks("1045-1130"));
        assert!(!partial.blocks("1000-1045"));
        assert_eq!(partial.blocked_slot_ids(catalog), vec!["1045-1130".to_string()]);
    }

    #[test]
    fn test_upsert_holiday_replaces_same_date() {
        let mut therapist = Therapist {
            id: Uuid::new_v4(),
            display_id: "NPL001".into(),
            name: "Asha".into(),
            is_active: true,
            holidays: vec![],
        };
        therapist.upsert_holiday(Holiday::full_day(date("2024-06-11"), "leave"));
        therapist.upsert_holiday(Holiday::partial(date("2024-06-11"), vec![], "half day"));
        therapist.upsert_holiday(Holiday::full_day(date("2024-06-10"), ""));

        assert_eq!(therapist.holidays.len(), 2);
        assert_eq!(therapist.holidays[0].date, date("2024-06-10"));
        assert!(!therapist.holiday_on(date("2024-06-11")).unwrap().is_full_day);
        assert!(therapist.matches("NPL001"));
        assert!(therapist.matches(&therapist.id.to_string()));
    }

    #[test]
    fn test_partial_payment_rules() {
        let now = Utc::now();
        let first = payment(1000.0, 0.0).apply(PaymentCollection::Partial(400.0), now).unwrap();
        assert_eq!(first.status, PaymentStatus::PartiallyPaid);
        assert_eq!(first.amount_paid, 400.0);

        let second = first.apply(PaymentCollection::Partial(600.0), now).unwrap();
        assert_eq!(second.status, PaymentStatus::Paid);

        assert_matches!(
            first.apply(PaymentCollection::Partial(601.0), now),
            Err(PaymentRuleError::InvalidPartialAmount { .. })
        );
        assert_matches!(
            first.apply(PaymentCollection::Partial(0.0), now),
            Err(PaymentRuleError::InvalidPartialAmount { .. })
        );
    }

    #[test]
    fn test_full_payment_settles_balance() {
        let paid = payment(1000.0, 250.0).apply(PaymentCollection::Full, Utc::now()).unwrap();
        assert_eq!(paid.amount_paid, 1000.0);
        assert_eq!(paid.status, PaymentStatus::Paid);
        assert_eq!(paid.remaining(), 0.0);
    }
}
