use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::ids::CounterName;
use shared_models::scheduling::{
    ApprovalStatus, Booking, BookingRequest, DiscountInfo, Holiday, LedgerEntry, Package,
    Patient, Payment, PaymentCollection, Session, SessionKey, SlotClash, Therapist, TherapyType,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A write would put two live claims on the same (date, slot, therapist).
    #[error("{} slot(s) already taken", conflicts.len())]
    UniqueViolation { conflicts: Vec<SlotClash> },

    /// A business rule checked inside the atomic unit refused the write.
    #[error("{0}")]
    Precondition(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound { entity, id: id.to_string() }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, .. } => {
                let mut entity = entity.to_string();
                if let Some(first) = entity.get_mut(..1) {
                    first.make_ascii_uppercase();
                }
                AppError::NotFound(format!("{} not found", entity))
            }
            StoreError::UniqueViolation { conflicts } => AppError::Conflict {
                message: "Selected therapist/time slot is no longer available.".to_string(),
                details: json!({ "conflicts": conflicts }),
            },
            StoreError::Precondition(msg) => AppError::ValidationError(msg),
            StoreError::Backend(msg) | StoreError::Serialization(msg) => AppError::Database(msg),
        }
    }
}

// ==============================================================================
// WRITE MODELS
// ==============================================================================

/// Everything needed to commit a new booking in one atomic unit.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub patient_id: Uuid,
    pub package_id: Uuid,
    pub therapy_id: Uuid,
    pub therapist_id: Uuid,
    /// Amount of the pending payment record.
    pub amount: f64,
    pub sessions: Vec<Session>,
    pub discount_info: Option<DiscountInfo>,
    pub remark: Option<String>,
    /// Pending booking request to approve and link.
    pub booking_request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BookingUpdate {
    pub patient_id: Uuid,
    pub package_id: Uuid,
    pub therapy_id: Uuid,
    pub therapist_id: Uuid,
    pub status: ApprovalStatus,
    pub sessions: Vec<Session>,
    pub discount_info: Option<DiscountInfo>,
    pub remark: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Capacity accounting for an update: `to_release = prev - next`, `to_reserve = next - prev`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDelta {
    pub to_release: Vec<SessionKey>,
    pub to_reserve: Vec<SessionKey>,
}

impl SessionDelta {
    pub fn between<'a>(
        previous: impl IntoIterator<Item = &'a Session>,
        next: impl IntoIterator<Item = &'a Session>,
    ) -> Self {
        let prev: BTreeSet<SessionKey> = previous.into_iter().map(Session::key).collect();
        let next: BTreeSet<SessionKey> = next.into_iter().map(Session::key).collect();
        Self {
            to_release: prev.difference(&next).cloned().collect(),
            to_reserve: next.difference(&prev).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_release.is_empty() && self.to_reserve.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CheckInOutcome {
    pub booking: Booking,
    pub already_checked_in: bool,
}

#[derive(Debug, Clone)]
pub struct NewTherapist {
    pub name: String,
    pub is_active: bool,
}

// ==============================================================================
// STORE TRAIT
// ==============================================================================

/// Persistence seam for the scheduling core. Methods documented as atomic
/// either apply every effect or none.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    // Therapists & holidays
    async fn list_therapists(&self, active_only: bool) -> StoreResult<Vec<Therapist>>;
    async fn therapists_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Therapist>>;
    /// Looks up by internal id or display id.
    async fn find_therapist(&self, reference: &str) -> StoreResult<Option<Therapist>>;
    async fn insert_therapist(&self, therapist: NewTherapist) -> StoreResult<Therapist>;
    /// Atomic. Upserts one record per date, refusing the whole set when any
    /// blocked slot already holds an active session.
    async fn upsert_holidays(&self, therapist_id: Uuid, holidays: Vec<Holiday>) -> StoreResult<Therapist>;

    // Session ledger
    async fn sessions_in_range(
        &self,
        therapist_ids: &[Uuid],
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<LedgerEntry>>;

    // Reference data
    async fn get_package(&self, id: Uuid) -> StoreResult<Option<Package>>;
    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>>;
    async fn get_therapy(&self, id: Uuid) -> StoreResult<Option<TherapyType>>;
    async fn insert_package(&self, package: Package) -> StoreResult<Package>;
    async fn insert_patient(&self, patient: Patient) -> StoreResult<Patient>;
    async fn insert_therapy(&self, therapy: TherapyType) -> StoreResult<TherapyType>;

    // Bookings
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;
    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>>;
    /// Atomic: appointment id, pending payment, invoice id, booking insert,
    /// slot usage and booking-request approval.
    async fn commit_booking(&self, draft: BookingDraft) -> StoreResult<Booking>;
    /// Atomic: replaces sessions and descriptive fields, applies the usage delta.
    async fn replace_booking(&self, id: Uuid, update: BookingUpdate, delta: SessionDelta) -> StoreResult<Booking>;
    /// Atomic: releases usage for every slot-bearing session, then deletes.
    async fn delete_booking(&self, id: Uuid) -> StoreResult<Booking>;
    async fn mark_checked_in(&self, booking_id: Uuid, session_id: Uuid) -> StoreResult<CheckInOutcome>;
    /// Atomic: payment amount/status and the booking's payment status.
    async fn collect_payment(
        &self,
        booking_id: Uuid,
        collection: PaymentCollection,
        at: DateTime<Utc>,
    ) -> StoreResult<Payment>;

    // Booking requests
    async fn get_booking_request(&self, id: Uuid) -> StoreResult<Option<BookingRequest>>;
    async fn insert_booking_request(&self, request: BookingRequest) -> StoreResult<BookingRequest>;
    /// Compare-and-set on the request status.
    async fn transition_booking_request(
        &self,
        id: Uuid,
        from: ApprovalStatus,
        to: ApprovalStatus,
    ) -> StoreResult<BookingRequest>;

    // Counters
    async fn next_sequence(&self, counter: CounterName) -> StoreResult<i64>;
    async fn slot_usage(&self, date: NaiveDate, slot_id: &str) -> StoreResult<i64>;
}
