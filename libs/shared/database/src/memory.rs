use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::ids::{self, CounterName};
use shared_models::scheduling::{
    ApprovalStatus, Booking, BookingRequest, Holiday, LedgerEntry, OccupancyReason, Package,
    Patient, Payment, PaymentCollection, PaymentStatus, SessionKey, SlotClash, Therapist,
    TherapyType,
};
use shared_models::slots::SlotCatalog;

use crate::store::{
    BookingDraft, BookingUpdate, CheckInOutcome, NewTherapist, SchedulingStore, SessionDelta,
    StoreError, StoreResult,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    therapists: BTreeMap<Uuid, Therapist>,
    patients: HashMap<Uuid, Patient>,
    packages: HashMap<Uuid, Package>,
    therapies: HashMap<Uuid, TherapyType>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    requests: HashMap<Uuid, BookingRequest>,
    counters: HashMap<CounterName, i64>,
    slot_usage: HashMap<(NaiveDate, String), i64>,
}

impl MemoryState {
    fn next_sequence(&mut self, counter: CounterName) -> i64 {
        let seq = self.counters.entry(counter).or_insert(0);
        *seq += 1;
        *seq
    }

    fn is_booked(&self, key: &SessionKey, exclude_booking: Option<Uuid>) -> bool {
        self.bookings
            .values()
            .filter(|booking| Some(booking.id) != exclude_booking)
            .flat_map(|booking| booking.active_sessions())
            .any(|session| session.key() == *key)
    }

    fn is_holiday(&self, key: &SessionKey) -> bool {
        self.therapists
            .get(&key.therapist_id)
            .and_then(|therapist| therapist.holiday_on(key.date))
            .map(|holiday| holiday.blocks(&key.slot_id))
            .unwrap_or(false)
    }

    fn clashes<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a SessionKey>,
        exclude_booking: Option<Uuid>,
    ) -> Vec<SlotClash> {
        keys.into_iter()
            .filter_map(|key| {
                let reason = if self.is_booked(key, exclude_booking) {
                    OccupancyReason::Booked
                } else if self.is_holiday(key) {
                    OccupancyReason::Holiday
                } else {
                    return None;
                };
                Some(SlotClash { key: key.clone(), reason })
            })
            .collect()
    }

    fn adjust_usage(&mut self, key: &SessionKey, delta: i64) {
        let count = self
            .slot_usage
            .entry((key.date, key.slot_id.clone()))
            .or_insert(0);
        *count = (*count + delta).max(0);
    }
}

/// Process-local store. Every mutation runs against a copy of the state that
/// replaces the live one only when the whole unit succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn atomic<T>(&self, unit: impl FnOnce(&mut MemoryState) -> StoreResult<T>) -> StoreResult<T> {
        let mut live = self.state.write().await;
        let mut working = live.clone();
        let out = unit(&mut working)?;
        *live = working;
        Ok(out)
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn list_therapists(&self, active_only: bool) -> StoreResult<Vec<Therapist>> {
        let state = self.state.read().await;
        Ok(state
            .therapists
            .values()
            .filter(|therapist| !active_only || therapist.is_active)
            .cloned()
            .collect())
    }

    async fn therapists_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Therapist>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.therapists.get(id).cloned())
            .collect())
    }

    async fn find_therapist(&self, reference: &str) -> StoreResult<Option<Therapist>> {
        let state = self.state.read().await;
        Ok(state
            .therapists
            .values()
            .find(|therapist| therapist.matches(reference))
            .cloned())
    }

    async fn insert_therapist(&self, therapist: NewTherapist) -> StoreResult<Therapist> {
        self.atomic(|state| {
            let seq = state.next_sequence(CounterName::Therapist);
            let record = Therapist {
                id: Uuid::new_v4(),
                display_id: ids::therapist_display_id(seq),
                name: therapist.name,
                is_active: therapist.is_active,
                holidays: Vec::new(),
            };
            state.therapists.insert(record.id, record.clone());
            Ok(record)
        })
        .await
    }

    async fn upsert_holidays(&self, therapist_id: Uuid, holidays: Vec<Holiday>) -> StoreResult<Therapist> {
        let catalog = SlotCatalog::standard();
        self.atomic(|state| {
            if !state.therapists.contains_key(&therapist_id) {
                return Err(StoreError::not_found("therapist", therapist_id));
            }

            let conflicts: Vec<SlotClash> = holidays
                .iter()
                .flat_map(|holiday| {
                    holiday
                        .blocked_slot_ids(catalog)
                        .into_iter()
                        .map(move |slot_id| SessionKey { date: holiday.date, slot_id, therapist_id })
                })
                .filter(|key| state.is_booked(key, None))
                .map(|key| SlotClash { key, reason: OccupancyReason::Booked })
                .collect();
            if !conflicts.is_empty() {
                return Err(StoreError::UniqueViolation { conflicts });
            }

            let therapist = state
                .therapists
                .get_mut(&therapist_id)
                .ok_or_else(|| StoreError::not_found("therapist", therapist_id))?;
            for holiday in holidays {
                therapist.upsert_holiday(holiday);
            }
            Ok(therapist.clone())
        })
        .await
    }

    async fn sessions_in_range(
        &self,
        therapist_ids: &[Uuid],
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<LedgerEntry> = state
            .bookings
            .values()
            .flat_map(|booking| {
                booking.sessions.iter().map(move |session| LedgerEntry {
                    booking_id: booking.id,
                    session_id: session.id,
                    date: session.date,
                    slot_id: session.slot_id.clone(),
                    therapist_id: session.therapist_id,
                    status: session.status,
                })
            })
            .filter(|entry| {
                entry.date >= from && entry.date <= to && therapist_ids.contains(&entry.therapist_id)
            })
            .collect();
        entries.sort_by(|a, b| (a.date, &a.slot_id).cmp(&(b.date, &b.slot_id)));
        Ok(entries)
    }

    async fn get_package(&self, id: Uuid) -> StoreResult<Option<Package>> {
        Ok(self.state.read().await.packages.get(&id).cloned())
    }

    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>> {
        Ok(self.state.read().await.patients.get(&id).cloned())
    }

    async fn get_therapy(&self, id: Uuid) -> StoreResult<Option<TherapyType>> {
        Ok(self.state.read().await.therapies.get(&id).cloned())
    }

    async fn insert_package(&self, package: Package) -> StoreResult<Package> {
        self.state.write().await.packages.insert(package.id, package.clone());
        Ok(package)
    }

    async fn insert_patient(&self, patient: Patient) -> StoreResult<Patient> {
        self.state.write().await.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn insert_therapy(&self, therapy: TherapyType) -> StoreResult<TherapyType> {
        self.state.write().await.therapies.insert(therapy.id, therapy.clone());
        Ok(therapy)
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.state.read().await.bookings.get(&id).cloned())
    }

    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn commit_booking(&self, draft: BookingDraft) -> StoreResult<Booking> {
        self.atomic(|state| {
            let appointment_seq = state.next_sequence(CounterName::Appointment);
            let invoice_seq = state.next_sequence(CounterName::Payment);

            let payment = Payment {
                id: Uuid::new_v4(),
                invoice_number: ids::invoice_number(draft.created_at.year(), invoice_seq),
                amount: draft.amount,
                amount_paid: 0.0,
                status: PaymentStatus::Pending,
                payment_time: None,
                created_at: draft.created_at,
            };

            let keys: Vec<SessionKey> = draft.sessions.iter().map(|s| s.key()).collect();
            let conflicts = state.clashes(&keys, None);
            if !conflicts.is_empty() {
                return Err(StoreError::UniqueViolation { conflicts });
            }

            let booking = Booking {
                id: Uuid::new_v4(),
                appointment_id: ids::appointment_id(appointment_seq),
                patient_id: draft.patient_id,
                package_id: draft.package_id,
                therapy_id: draft.therapy_id,
                therapist_id: draft.therapist_id,
                status: ApprovalStatus::Pending,
                payment_id: Some(payment.id),
                payment_status: PaymentStatus::Pending,
                sessions: draft.sessions,
                discount_info: draft.discount_info,
                booking_request_id: draft.booking_request_id,
                remark: draft.remark,
                created_at: draft.created_at,
                updated_at: draft.created_at,
            };

            if let Some(request_id) = draft.booking_request_id {
                match state.requests.get_mut(&request_id) {
                    Some(request) if request.status != ApprovalStatus::Pending => {
                        return Err(StoreError::Precondition(format!(
                            "Booking request is already {}",
                            request.status
                        )));
                    }
                    Some(request) => {
                        request.status = ApprovalStatus::Approved;
                        request.booking_id = Some(booking.id);
                    }
                    None => warn!("Booking request {} not found, skipping approval", request_id),
                }
            }

            for key in &keys {
                state.adjust_usage(key, 1);
            }
            state.payments.insert(payment.id, payment);
            state.bookings.insert(booking.id, booking.clone());
            debug!("Committed booking {} ({})", booking.appointment_id, booking.id);
            Ok(booking)
        })
        .await
    }

    async fn replace_booking(&self, id: Uuid, update: BookingUpdate, delta: SessionDelta) -> StoreResult<Booking> {
        self.atomic(|state| {
            if !state.bookings.contains_key(&id) {
                return Err(StoreError::not_found("booking", id));
            }

            let conflicts = state.clashes(&delta.to_reserve, Some(id));
            if !conflicts.is_empty() {
                return Err(StoreError::UniqueViolation { conflicts });
            }

            for key in &delta.to_release {
                state.adjust_usage(key, -1);
            }
            for key in &delta.to_reserve {
                state.adjust_usage(key, 1);
            }

            let booking = state
                .bookings
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("booking", id))?;
            booking.patient_id = update.patient_id;
            booking.package_id = update.package_id;
            booking.therapy_id = update.therapy_id;
            booking.therapist_id = update.therapist_id;
            booking.status = update.status;
            booking.sessions = update.sessions;
            booking.discount_info = update.discount_info;
            booking.remark = update.remark;
            booking.updated_at = update.updated_at;
            Ok(booking.clone())
        })
        .await
    }

    async fn delete_booking(&self, id: Uuid) -> StoreResult<Booking> {
        self.atomic(|state| {
            let booking = state
                .bookings
                .remove(&id)
                .ok_or_else(|| StoreError::not_found("booking", id))?;
            for session in booking.sessions.iter().filter(|s| !s.slot_id.is_empty()) {
                state.adjust_usage(&session.key(), -1);
            }
            Ok(booking)
        })
        .await
    }

    async fn mark_checked_in(&self, booking_id: Uuid, session_id: Uuid) -> StoreResult<CheckInOutcome> {
        self.atomic(|state| {
            let booking = state
                .bookings
                .get_mut(&booking_id)
                .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
            let session = booking
                .sessions
                .iter_mut()
                .find(|session| session.id == session_id)
                .ok_or_else(|| StoreError::not_found("session", session_id))?;

            if session.is_checked_in {
                return Ok(CheckInOutcome { booking: booking.clone(), already_checked_in: true });
            }
            if !session.is_active() {
                return Err(StoreError::Precondition(format!(
                    "Cannot check in a session that is {}",
                    session.status
                )));
            }

            session.is_checked_in = true;
            booking.updated_at = Utc::now();
            Ok(CheckInOutcome { booking: booking.clone(), already_checked_in: false })
        })
        .await
    }

    async fn collect_payment(
        &self,
        booking_id: Uuid,
        collection: PaymentCollection,
        at: DateTime<Utc>,
    ) -> StoreResult<Payment> {
        self.atomic(|state| {
            let payment_id = state
                .bookings
                .get(&booking_id)
                .ok_or_else(|| StoreError::not_found("booking", booking_id))?
                .payment_id
                .ok_or_else(|| {
                    StoreError::Precondition("This booking has no associated payment record.".to_string())
                })?;

            let current = state
                .payments
                .get(&payment_id)
                .ok_or_else(|| StoreError::not_found("payment", payment_id))?;
            let updated = current
                .apply(collection, at)
                .map_err(|e| StoreError::Precondition(e.to_string()))?;

            if let Some(booking) = state.bookings.get_mut(&booking_id) {
                booking.payment_status = updated.status;
                booking.updated_at = at;
            }
            state.payments.insert(payment_id, updated.clone());
            Ok(updated)
        })
        .await
    }

    async fn get_booking_request(&self, id: Uuid) -> StoreResult<Option<BookingRequest>> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn insert_booking_request(&self, request: BookingRequest) -> StoreResult<BookingRequest> {
        self.state.write().await.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn transition_booking_request(
        &self,
        id: Uuid,
        from: ApprovalStatus,
        to: ApprovalStatus,
    ) -> StoreResult<BookingRequest> {
        self.atomic(|state| {
            let request = state
                .requests
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("booking request", id))?;
            if request.status != from {
                return Err(StoreError::Precondition(format!(
                    "Booking request is already {}",
                    request.status
                )));
            }
            request.status = to;
            Ok(request.clone())
        })
        .await
    }

    async fn next_sequence(&self, counter: CounterName) -> StoreResult<i64> {
        Ok(self.state.write().await.next_sequence(counter))
    }

    async fn slot_usage(&self, date: NaiveDate, slot_id: &str) -> StoreResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .slot_usage
            .get(&(date, slot_id.to_string()))
            .copied()
            .unwrap_or(0))
    }
}
