use chrono::{NaiveDate, Utc};
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::store::{BookingDraft, BookingUpdate, SessionDelta};
use shared_database::{AppState, SchedulingStore, StoreError};
use shared_models::scheduling::{
    ApprovalStatus, Booking, DiscountInfo, Package, Patient, PopulatedBooking, Session,
    SessionKey, SessionStatus, Therapist, TherapyType,
};
use shared_models::slots::SlotCatalog;
use shared_utils::dates;
use therapist_cell::models::AvailabilitySummary;
use therapist_cell::services::AvailabilitySummarizer;

use crate::models::{
    non_blank, BookingError, BookingPhase, CheckInRequest, CouponRef, CreateBookingRequest,
    SessionInput, UpdateBookingRequest,
};
use crate::services::conflict::{ConflictDetectionService, RequestedSlot};
use crate::services::lifecycle::BookingLifecycleService;

const MISSING_FIELDS: &str = "Missing required fields";
const INVALID_SESSION: &str =
    "Invalid session data: All sessions must have date, slotId/id, and therapistId.";
const UNKNOWN_THERAPIST: &str = "One or more therapist(s) referenced in sessions do not exist.";

/// Tracks one create/update attempt through its phases.
struct Attempt {
    operation: &'static str,
    phase: BookingPhase,
}

impl Attempt {
    fn start(operation: &'static str) -> Self {
        debug!(operation, phase = %BookingPhase::Validating, "Booking attempt started");
        Self { operation, phase: BookingPhase::Validating }
    }

    fn advance(&mut self, next: BookingPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(operation = self.operation, from = %self.phase, to = %next, "Ignoring out-of-order phase change");
            return;
        }
        debug!(operation = self.operation, from = %self.phase, to = %next, "Booking phase change");
        self.phase = next;
    }

    fn abort(&mut self, err: BookingError) -> BookingError {
        info!(operation = self.operation, phase = %self.phase, "Booking attempt aborted: {}", err);
        self.advance(BookingPhase::Aborted);
        err
    }
}

/// A session input resolved against the catalog and the therapist roster.
#[derive(Debug, Clone)]
struct ResolvedSession {
    slot: RequestedSlot,
    therapy_type_id: Uuid,
    time: String,
}

/// Referenced entities shared by create and update.
struct References {
    patient: Patient,
    package: Package,
    therapy: TherapyType,
}

pub struct BookingCoordinator {
    store: Arc<dyn SchedulingStore>,
    catalog: &'static SlotCatalog,
    summarizer: AvailabilitySummarizer,
    conflicts: ConflictDetectionService,
    lifecycle: BookingLifecycleService,
}

impl BookingCoordinator {
    pub fn new(store: Arc<dyn SchedulingStore>, summarizer: AvailabilitySummarizer) -> Self {
        Self {
            store,
            catalog: SlotCatalog::standard(),
            summarizer,
            conflicts: ConflictDetectionService::new(),
            lifecycle: BookingLifecycleService::new(),
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(state.store.clone(), AvailabilitySummarizer::from_state(state))
    }

    // ==========================================================================
    // CREATE
    // ==========================================================================

    #[instrument(skip(self, request))]
    pub async fn create_booking(&self, request: CreateBookingRequest) -> Result<PopulatedBooking, BookingError> {
        let mut attempt = Attempt::start("create");

        let (refs, primary, resolved, request_id) = self
            .validate_create(&request)
            .await
            .map_err(|e| attempt.abort(e))?;
        let requested: Vec<RequestedSlot> = resolved.iter().map(|s| s.slot.clone()).collect();

        attempt.advance(BookingPhase::AvailabilityChecking);
        let availability = self
            .availability_for(&requested)
            .await
            .map_err(|e| attempt.abort(e))?;
        let conflicts = self.conflicts.find_conflicts(&requested, &availability, &BTreeSet::new());
        if !conflicts.is_empty() {
            return Err(attempt.abort(BookingError::Conflicts {
                conflicts,
                availability: Some(availability),
            }));
        }

        attempt.advance(BookingPhase::Reserving);
        let now = Utc::now();
        let sessions: Vec<Session> = resolved.iter().map(new_session).collect();
        let draft = BookingDraft {
            patient_id: refs.patient.id,
            package_id: refs.package.id,
            therapy_id: refs.therapy.id,
            therapist_id: primary.id,
            amount: refs.package.total_cost,
            sessions,
            discount_info: discount_info(request.coupon.as_ref()),
            remark: request.remark.clone(),
            booking_request_id: request_id,
            created_at: now,
        };

        attempt.advance(BookingPhase::Committing);
        let booking = self
            .store
            .commit_booking(draft)
            .await
            .map_err(|e| attempt.abort(self.commit_error(e, &requested)))?;
        attempt.advance(BookingPhase::Committed);

        info!(
            "Booking {} created for patient {} with {} session(s)",
            booking.appointment_id,
            booking.patient_id,
            booking.sessions.len()
        );
        self.populate(booking).await
    }

    async fn validate_create(
        &self,
        request: &CreateBookingRequest,
    ) -> Result<(References, Therapist, Vec<ResolvedSession>, Option<Uuid>), BookingError> {
        let (Some(package), Some(patient), Some(therapy), Some(therapist)) = (
            non_blank(request.package.as_deref()),
            non_blank(request.patient.as_deref()),
            non_blank(request.therapy.as_deref()),
            non_blank(request.therapist.as_deref()),
        ) else {
            return Err(BookingError::Validation(MISSING_FIELDS.to_string()));
        };
        if request.sessions.is_empty() {
            return Err(BookingError::Validation(MISSING_FIELDS.to_string()));
        }

        let refs = self.load_references(package, patient, therapy).await?;
        let roster = self.store.list_therapists(false).await?;
        let primary = find_therapist(&roster, therapist)?.clone();
        let resolved = self.resolve_sessions(&request.sessions, therapist, refs.therapy.id, &roster)?;
        let request_id = self.pending_request_id(request).await?;

        Ok((refs, primary, resolved, request_id))
    }

    /// The booking request this booking fulfils, when flagged as one.
    async fn pending_request_id(&self, request: &CreateBookingRequest) -> Result<Option<Uuid>, BookingError> {
        if !request.is_booking_request {
            return Ok(None);
        }
        let Some(raw) = non_blank(request.booking_request_id.as_deref()) else {
            return Ok(None);
        };
        let id = parse_id(raw, "booking request")?;

        match self.store.get_booking_request(id).await? {
            Some(existing) if existing.status != ApprovalStatus::Pending => Err(BookingError::Validation(
                format!("Booking request is already {}", existing.status),
            )),
            Some(_) => Ok(Some(id)),
            None => {
                warn!("Booking request {} not found, booking will not be linked", id);
                Ok(Some(id))
            }
        }
    }

    // ==========================================================================
    // UPDATE
    // ==========================================================================

    /// Replaces sessions and descriptive fields. Sessions whose (date, slot,
    /// therapist) is unchanged are not re-checked.
    #[instrument(skip(self, request))]
    pub async fn update_booking(
        &self,
        id: Uuid,
        request: UpdateBookingRequest,
    ) -> Result<PopulatedBooking, BookingError> {
        let mut attempt = Attempt::start("update");

        let (refs, primary, resolved, previous) = self
            .validate_update(id, &request)
            .await
            .map_err(|e| attempt.abort(e))?;
        let requested: Vec<RequestedSlot> = resolved.iter().map(|s| s.slot.clone()).collect();
        let unchanged: BTreeSet<SessionKey> = previous.active_sessions().map(Session::key).collect();

        attempt.advance(BookingPhase::AvailabilityChecking);
        let availability = self
            .availability_for(&requested)
            .await
            .map_err(|e| attempt.abort(e))?;
        let conflicts = self.conflicts.find_conflicts(&requested, &availability, &unchanged);
        if !conflicts.is_empty() {
            return Err(attempt.abort(BookingError::Conflicts {
                conflicts,
                availability: Some(availability),
            }));
        }

        attempt.advance(BookingPhase::Reserving);
        let sessions: Vec<Session> = resolved
            .iter()
            .map(|resolved| {
                // Unchanged triples keep their identity and check-in state.
                match previous.active_sessions().find(|s| s.key() == resolved.slot.key) {
                    Some(existing) => Session {
                        therapy_type_id: Some(resolved.therapy_type_id),
                        time: resolved.time.clone(),
                        therapist_display_id: Some(resolved.slot.therapist_display_id.clone()),
                        ..existing.clone()
                    },
                    None => new_session(resolved),
                }
            })
            .collect();
        let delta = SessionDelta::between(previous.active_sessions(), &sessions);
        let new_keys: Vec<RequestedSlot> = requested
            .iter()
            .filter(|slot| delta.to_reserve.contains(&slot.key))
            .cloned()
            .collect();
        debug!(
            "Booking {} delta: release {}, reserve {}",
            previous.appointment_id,
            delta.to_release.len(),
            delta.to_reserve.len()
        );

        let update = BookingUpdate {
            patient_id: refs.patient.id,
            package_id: refs.package.id,
            therapy_id: refs.therapy.id,
            therapist_id: primary,
            status: request.status.unwrap_or(previous.status),
            sessions,
            discount_info: discount_info(request.coupon.as_ref()).or(previous.discount_info.clone()),
            remark: request.remark.clone().or(previous.remark.clone()),
            updated_at: Utc::now(),
        };

        attempt.advance(BookingPhase::Committing);
        let booking = self
            .store
            .replace_booking(id, update, delta)
            .await
            .map_err(|e| attempt.abort(self.commit_error(e, &new_keys)))?;
        attempt.advance(BookingPhase::Committed);

        info!("Booking {} updated", booking.appointment_id);
        self.populate(booking).await
    }

    async fn validate_update(
        &self,
        id: Uuid,
        request: &UpdateBookingRequest,
    ) -> Result<(References, Uuid, Vec<ResolvedSession>, Booking), BookingError> {
        let (Some(package), Some(patient), Some(therapy)) = (
            non_blank(request.package.as_deref()),
            non_blank(request.patient.as_deref()),
            non_blank(request.therapy.as_deref()),
        ) else {
            return Err(BookingError::Validation(MISSING_FIELDS.to_string()));
        };
        if request.sessions.is_empty() {
            return Err(BookingError::Validation(MISSING_FIELDS.to_string()));
        }

        let previous = self
            .store
            .get_booking(id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking not found".to_string()))?;
        if let Some(status) = request.status {
            self.lifecycle.validate_status_transition(previous.status, status)?;
        }

        let refs = self.load_references(package, patient, therapy).await?;
        let roster = self.store.list_therapists(false).await?;
        let fallback = previous.therapist_id.to_string();
        let default_therapist = non_blank(request.therapist.as_deref()).unwrap_or(fallback.as_str());
        let primary = match non_blank(request.therapist.as_deref()) {
            Some(reference) => find_therapist(&roster, reference)?.id,
            None => previous.therapist_id,
        };
        let resolved = self.resolve_sessions(&request.sessions, default_therapist, refs.therapy.id, &roster)?;

        Ok((refs, primary, resolved, previous))
    }

    // ==========================================================================
    // DELETE / READ / CHECK-IN
    // ==========================================================================

    /// Releases every slot-bearing session's usage, then removes the booking.
    #[instrument(skip(self))]
    pub async fn delete_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        let booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking not found".to_string()))?;

        if !booking.sessions.iter().any(|s| !s.slot_id.trim().is_empty()) {
            warn!("Booking {} holds no slot-bearing sessions, nothing to release", booking.appointment_id);
        }

        let deleted = self.store.delete_booking(id).await?;
        info!("Booking {} deleted", deleted.appointment_id);
        Ok(deleted)
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<PopulatedBooking, BookingError> {
        let booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking not found".to_string()))?;
        self.populate(booking).await
    }

    /// Marks one session checked in. A repeat call changes nothing and
    /// reports `true` for already checked in.
    pub async fn check_in(&self, request: CheckInRequest) -> Result<(Booking, bool), BookingError> {
        let (Some(booking_id), Some(session_id)) = (
            non_blank(request.booking_id.as_deref()),
            non_blank(request.session_id.as_deref()),
        ) else {
            return Err(BookingError::Validation("bookingId and sessionId are required.".to_string()));
        };
        let booking_id = parse_id(booking_id, "booking")?;
        let session_id = parse_id(session_id, "session")?;

        let outcome = self
            .store
            .mark_checked_in(booking_id, session_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { entity: "session", .. } => {
                    BookingError::NotFound("Session not found in this booking.".to_string())
                }
                other => other.into(),
            })?;
        if outcome.already_checked_in {
            debug!("Session {} of booking {} already checked in", session_id, booking_id);
        } else {
            info!("Checked in session {} of booking {}", session_id, booking_id);
        }
        Ok((outcome.booking, outcome.already_checked_in))
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn load_references(&self, package: &str, patient: &str, therapy: &str) -> Result<References, BookingError> {
        let package_id = parse_id(package, "package")?;
        let patient_id = parse_id(patient, "patient")?;
        let therapy_id = parse_id(therapy, "therapy")?;

        let (package, patient, therapy) = tokio::try_join!(
            self.store.get_package(package_id),
            self.store.get_patient(patient_id),
            self.store.get_therapy(therapy_id),
        )?;

        Ok(References {
            package: package.ok_or_else(|| BookingError::Validation("Invalid package".to_string()))?,
            patient: patient.ok_or_else(|| BookingError::Validation("Invalid patient".to_string()))?,
            therapy: therapy.ok_or_else(|| BookingError::Validation("Invalid therapy".to_string()))?,
        })
    }

    fn resolve_sessions(
        &self,
        inputs: &[SessionInput],
        default_therapist: &str,
        default_therapy: Uuid,
        roster: &[Therapist],
    ) -> Result<Vec<ResolvedSession>, BookingError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(inputs.len());

        for input in inputs {
            let date = non_blank(input.date.as_deref())
                .and_then(dates::parse_iso_date)
                .ok_or_else(|| BookingError::Validation(INVALID_SESSION.to_string()))?;
            let slot_id = input
                .slot_ref()
                .ok_or_else(|| BookingError::Validation(INVALID_SESSION.to_string()))?;
            let slot = self
                .catalog
                .get(slot_id)
                .ok_or_else(|| BookingError::Validation(format!("Unknown slot id '{}'", slot_id)))?;

            let therapist = find_therapist(roster, input.therapist_ref().unwrap_or(default_therapist))?;
            if !therapist.is_active {
                return Err(BookingError::Validation(format!(
                    "Therapist {} is not active",
                    therapist.display_id
                )));
            }

            let therapy_type_id = match input.therapy_ref() {
                Some(raw) => parse_id(raw, "therapy type")?,
                None => default_therapy,
            };

            let key = SessionKey { date, slot_id: slot.slot_id.clone(), therapist_id: therapist.id };
            if !seen.insert(key.clone()) {
                return Err(BookingError::Validation(format!(
                    "Duplicate session for {} on {} at {}",
                    therapist.display_id,
                    date.format(dates::ISO_FORMAT),
                    slot.label
                )));
            }

            resolved.push(ResolvedSession {
                slot: RequestedSlot { key, therapist_display_id: therapist.display_id.clone() },
                therapy_type_id,
                time: non_blank(input.time.as_deref()).unwrap_or(slot.label.as_str()).to_string(),
            });
        }

        Ok(resolved)
    }

    /// One summary per referenced therapist, covering only the dates requested for them.
    async fn availability_for(
        &self,
        requested: &[RequestedSlot],
    ) -> Result<BTreeMap<String, AvailabilitySummary>, BookingError> {
        let dates_by_therapist = self.conflicts.dates_by_therapist(requested);
        if dates_by_therapist.is_empty() {
            return Ok(BTreeMap::new());
        }

        let therapist_ids: Vec<Uuid> = dates_by_therapist.keys().copied().collect();
        let therapists = self.store.therapists_by_ids(&therapist_ids).await?;

        let summaries = try_join_all(therapists.iter().filter_map(|therapist| {
            dates_by_therapist
                .get(&therapist.id)
                .map(|days| self.summarize_one(therapist, days))
        }))
        .await?;
        Ok(summaries.into_iter().collect())
    }

    async fn summarize_one(
        &self,
        therapist: &Therapist,
        days: &BTreeSet<NaiveDate>,
    ) -> Result<(String, AvailabilitySummary), BookingError> {
        let summary = self
            .summarizer
            .summarize_dates(std::slice::from_ref(therapist), days)
            .await?;
        Ok((therapist.display_id.clone(), summary))
    }

    /// A uniqueness violation at commit is the same business outcome as a
    /// conflict found by the availability check.
    fn commit_error(&self, err: StoreError, candidates: &[RequestedSlot]) -> BookingError {
        match err {
            StoreError::UniqueViolation { conflicts } => {
                warn!("Commit lost a race for {} slot(s)", conflicts.len().max(1));
                BookingError::Conflicts {
                    conflicts: self.conflicts.from_clashes(&conflicts, candidates),
                    availability: None,
                }
            }
            other => other.into(),
        }
    }

    async fn populate(&self, booking: Booking) -> Result<PopulatedBooking, BookingError> {
        let payment = async {
            match booking.payment_id {
                Some(id) => self.store.get_payment(id).await,
                None => Ok(None),
            }
        };
        let (patient, package, therapy, mut therapists, payment) = tokio::try_join!(
            self.store.get_patient(booking.patient_id),
            self.store.get_package(booking.package_id),
            self.store.get_therapy(booking.therapy_id),
            self.store.therapists_by_ids(std::slice::from_ref(&booking.therapist_id)),
            payment,
        )?;

        Ok(PopulatedBooking {
            patient,
            package,
            therapy,
            therapist: therapists.pop(),
            payment,
            booking,
        })
    }
}

fn find_therapist<'a>(roster: &'a [Therapist], reference: &str) -> Result<&'a Therapist, BookingError> {
    roster
        .iter()
        .find(|therapist| therapist.matches(reference))
        .ok_or_else(|| BookingError::Validation(UNKNOWN_THERAPIST.to_string()))
}

fn new_session(resolved: &ResolvedSession) -> Session {
    Session {
        id: Uuid::new_v4(),
        date: resolved.slot.key.date,
        slot_id: resolved.slot.key.slot_id.clone(),
        time: resolved.time.clone(),
        therapist_id: resolved.slot.key.therapist_id,
        therapist_display_id: Some(resolved.slot.therapist_display_id.clone()),
        therapy_type_id: Some(resolved.therapy_type_id),
        is_checked_in: false,
        status: SessionStatus::Scheduled,
    }
}

fn discount_info(coupon: Option<&CouponRef>) -> Option<DiscountInfo> {
    coupon.and_then(CouponRef::id).map(|id| DiscountInfo {
        coupon: id.to_string(),
        time: Utc::now(),
    })
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, BookingError> {
    Uuid::parse_str(raw.trim()).map_err(|_| BookingError::Validation(format!("Invalid {} id '{}'", what, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid", "package").is_err());
        assert!(parse_id(&Uuid::nil().to_string(), "package").is_ok());
    }

    #[test]
    fn test_discount_info_from_coupon() {
        let info = discount_info(Some(&CouponRef::Object { id: "FIRST50".into() })).unwrap();
        assert_eq!(info.coupon, "FIRST50");
        assert!(discount_info(Some(&CouponRef::Id(String::new()))).is_none());
        assert!(discount_info(None).is_none());
    }
}
