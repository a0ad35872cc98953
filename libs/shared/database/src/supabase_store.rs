use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::ids::{self, CounterName};
use shared_models::scheduling::{
    ApprovalStatus, Booking, BookingRequest, DiscountInfo, Holiday, HolidaySlot, LedgerEntry,
    OccupancyReason, Package, Patient, Payment, PaymentCollection, PaymentStatus, Session,
    SessionKey, SessionStatus, SlotClash, Therapist, TherapyType,
};

use crate::store::{
    BookingDraft, BookingUpdate, CheckInOutcome, NewTherapist, SchedulingStore, SessionDelta,
    StoreError, StoreResult,
};
use crate::supabase::{PostgrestError, SupabaseClient};

// ==============================================================================
// ROW TYPES
// ==============================================================================

#[derive(Debug, Deserialize)]
struct TherapistRow {
    id: Uuid,
    display_id: String,
    name: String,
    is_active: bool,
    #[serde(default)]
    therapist_holidays: Vec<HolidayRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HolidayRow {
    date: NaiveDate,
    is_full_day: bool,
    #[serde(default)]
    slots: Vec<HolidaySlot>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<TherapistRow> for Therapist {
    fn from(row: TherapistRow) -> Self {
        let mut holidays: Vec<Holiday> = row
            .therapist_holidays
            .into_iter()
            .map(|h| Holiday {
                date: h.date,
                is_full_day: h.is_full_day,
                slots: if h.is_full_day { Vec::new() } else { h.slots },
                reason: h.reason.unwrap_or_default(),
            })
            .collect();
        holidays.sort_by_key(|h| h.date);
        Therapist {
            id: row.id,
            display_id: row.display_id,
            name: row.name,
            is_active: row.is_active,
            holidays,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRow {
    id: Uuid,
    date: NaiveDate,
    slot_id: String,
    #[serde(default)]
    time: String,
    therapist_id: Uuid,
    #[serde(default)]
    therapist_display_id: Option<String>,
    #[serde(default)]
    therapy_type_id: Option<Uuid>,
    #[serde(default)]
    is_checked_in: bool,
    #[serde(default)]
    status: SessionStatus,
    #[serde(default)]
    position: i32,
}

impl SessionRow {
    fn from_session(session: &Session, position: usize) -> Self {
        Self {
            id: session.id,
            date: session.date,
            slot_id: session.slot_id.clone(),
            time: session.time.clone(),
            therapist_id: session.therapist_id,
            therapist_display_id: session.therapist_display_id.clone(),
            therapy_type_id: session.therapy_type_id,
            is_checked_in: session.is_checked_in,
            status: session.status,
            position: position as i32,
        }
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            date: row.date,
            slot_id: row.slot_id,
            time: row.time,
            therapist_id: row.therapist_id,
            therapist_display_id: row.therapist_display_id,
            therapy_type_id: row.therapy_type_id,
            is_checked_in: row.is_checked_in,
            status: row.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LedgerRow {
    id: Uuid,
    booking_id: Uuid,
    date: NaiveDate,
    slot_id: String,
    therapist_id: Uuid,
    #[serde(default)]
    status: SessionStatus,
}

#[derive(Debug, Deserialize)]
struct BookingRow {
    id: Uuid,
    appointment_id: String,
    patient_id: Uuid,
    package_id: Uuid,
    therapy_id: Uuid,
    therapist_id: Uuid,
    status: ApprovalStatus,
    payment_id: Option<Uuid>,
    #[serde(default)]
    payment_status: PaymentStatus,
    discount_info: Option<DiscountInfo>,
    booking_request_id: Option<Uuid>,
    remark: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    booking_sessions: Vec<SessionRow>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        let mut sessions = row.booking_sessions;
        sessions.sort_by_key(|s| s.position);
        Booking {
            id: row.id,
            appointment_id: row.appointment_id,
            patient_id: row.patient_id,
            package_id: row.package_id,
            therapy_id: row.therapy_id,
            therapist_id: row.therapist_id,
            status: row.status,
            payment_id: row.payment_id,
            payment_status: row.payment_status,
            sessions: sessions.into_iter().map(Session::from).collect(),
            discount_info: row.discount_info,
            booking_request_id: row.booking_request_id,
            remark: row.remark,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentRow {
    id: Uuid,
    invoice_number: String,
    amount: f64,
    #[serde(default)]
    amount_paid: f64,
    status: PaymentStatus,
    payment_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            invoice_number: row.invoice_number,
            amount: row.amount,
            amount_paid: row.amount_paid,
            status: row.status,
            payment_time: row.payment_time,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PackageRow {
    id: Uuid,
    name: String,
    total_cost: f64,
    session_count: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BookingRequestRow {
    id: Uuid,
    patient_id: Option<Uuid>,
    status: ApprovalStatus,
    booking_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<BookingRequestRow> for BookingRequest {
    fn from(row: BookingRequestRow) -> Self {
        BookingRequest {
            id: row.id,
            patient_id: row.patient_id,
            status: row.status,
            booking_id: row.booking_id,
            created_at: row.created_at,
        }
    }
}

/// Conflict detail raised by the RPC functions with SQLSTATE 23505.
#[derive(Debug, Deserialize)]
struct ClashRow {
    date: NaiveDate,
    slot_id: String,
    therapist_id: Uuid,
    reason: OccupancyReason,
}

#[derive(Debug, Deserialize)]
struct UsageRow {
    count: i64,
}

// ==============================================================================
// ERROR TRANSLATION
// ==============================================================================

fn translate(err: anyhow::Error) -> StoreError {
    let Some(pg) = err.downcast_ref::<PostgrestError>() else {
        return StoreError::Backend(err.to_string());
    };

    match pg.code.as_deref() {
        Some("23505") => {
            let conflicts = pg
                .details
                .as_deref()
                .and_then(|raw| serde_json::from_str::<Vec<ClashRow>>(raw).ok())
                .unwrap_or_default()
                .into_iter()
                .map(|row| SlotClash {
                    key: SessionKey { date: row.date, slot_id: row.slot_id, therapist_id: row.therapist_id },
                    reason: row.reason,
                })
                .collect();
            StoreError::UniqueViolation { conflicts }
        }
        Some("P0002") => StoreError::NotFound {
            entity: "record",
            id: pg.details.clone().unwrap_or_else(|| pg.message.clone()),
        },
        Some("P0001") => StoreError::Precondition(pg.message.clone()),
        _ => StoreError::Backend(pg.to_string()),
    }
}

fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

fn in_list(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",")
}

// ==============================================================================
// STORE
// ==============================================================================

/// PostgREST-backed store. Reads go through table endpoints; every atomic unit
/// is a Postgres function (see `migrations/0001_scheduling.sql`).
pub struct SupabaseStore {
    supabase: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(&self, path: &str) -> StoreResult<Vec<T>> {
        self.supabase
            .request::<Vec<T>>(Method::GET, path, None)
            .await
            .map_err(translate)
    }

    async fn get_one<T: serde::de::DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        Ok(self.get_rows::<T>(path).await?.into_iter().next())
    }

    async fn insert_row<T: serde::de::DeserializeOwned>(&self, table: &str, row: Value) -> StoreResult<T> {
        let path = format!("/rest/v1/{}", table);
        let rows: Vec<T> = self
            .supabase
            .request_with_headers(Method::POST, &path, Some(row), Some(return_representation()))
            .await
            .map_err(translate)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend(format!("Insert into {} returned no rows", table)))
    }

    async fn rpc<T: serde::de::DeserializeOwned>(&self, function: &str, args: Value) -> StoreResult<T> {
        debug!("Calling rpc {}", function);
        self.supabase.rpc(function, args).await.map_err(translate)
    }

    async fn require_booking(&self, id: Uuid) -> StoreResult<Booking> {
        self.get_booking(id)
            .await?
            .ok_or_else(|| StoreError::not_found("booking", id))
    }

    async fn require_therapist(&self, id: Uuid) -> StoreResult<Therapist> {
        self.find_therapist(&id.to_string())
            .await?
            .ok_or_else(|| StoreError::not_found("therapist", id))
    }
}

const THERAPIST_SELECT: &str = "select=*,therapist_holidays(*)";
const BOOKING_SELECT: &str = "select=*,booking_sessions(*)";

#[async_trait]
impl SchedulingStore for SupabaseStore {
    async fn list_therapists(&self, active_only: bool) -> StoreResult<Vec<Therapist>> {
        let mut path = format!("/rest/v1/therapists?{}&order=display_id.asc", THERAPIST_SELECT);
        if active_only {
            path.push_str("&is_active=eq.true");
        }
        let rows: Vec<TherapistRow> = self.get_rows(&path).await?;
        Ok(rows.into_iter().map(Therapist::from).collect())
    }

    async fn therapists_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Therapist>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!("/rest/v1/therapists?{}&id=in.({})", THERAPIST_SELECT, in_list(ids));
        let rows: Vec<TherapistRow> = self.get_rows(&path).await?;
        Ok(rows.into_iter().map(Therapist::from).collect())
    }

    async fn find_therapist(&self, reference: &str) -> StoreResult<Option<Therapist>> {
        let filter = match Uuid::parse_str(reference) {
            Ok(id) => format!("id=eq.{}", id),
            Err(_) => format!("display_id=eq.{}", urlencoding::encode(reference)),
        };
        let path = format!("/rest/v1/therapists?{}&{}", THERAPIST_SELECT, filter);
        Ok(self.get_one::<TherapistRow>(&path).await?.map(Therapist::from))
    }

    async fn insert_therapist(&self, therapist: NewTherapist) -> StoreResult<Therapist> {
        let seq = self.next_sequence(CounterName::Therapist).await?;
        let row: TherapistRow = self
            .insert_row(
                "therapists",
                json!({
                    "id": Uuid::new_v4(),
                    "display_id": ids::therapist_display_id(seq),
                    "name": therapist.name,
                    "is_active": therapist.is_active,
                }),
            )
            .await?;
        Ok(row.into())
    }

    async fn upsert_holidays(&self, therapist_id: Uuid, holidays: Vec<Holiday>) -> StoreResult<Therapist> {
        let rows: Vec<HolidayRow> = holidays
            .into_iter()
            .map(|h| HolidayRow {
                date: h.date,
                is_full_day: h.is_full_day,
                slots: h.slots,
                reason: Some(h.reason),
            })
            .collect();
        let _: Value = self
            .rpc(
                "upsert_holidays",
                json!({ "p_therapist_id": therapist_id, "p_holidays": rows }),
            )
            .await?;
        self.require_therapist(therapist_id).await
    }

    async fn sessions_in_range(
        &self,
        therapist_ids: &[Uuid],
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<LedgerEntry>> {
        if therapist_ids.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!(
            "/rest/v1/booking_sessions?select=id,booking_id,date,slot_id,therapist_id,status\
             &therapist_id=in.({})&date=gte.{}&date=lte.{}&order=date.asc,slot_id.asc",
            in_list(therapist_ids),
            from,
            to
        );
        let rows: Vec<LedgerRow> = self.get_rows(&path).await?;
        Ok(rows
            .into_iter()
            .map(|row| LedgerEntry {
                booking_id: row.booking_id,
                session_id: row.id,
                date: row.date,
                slot_id: row.slot_id,
                therapist_id: row.therapist_id,
                status: row.status,
            })
            .collect())
    }

    async fn get_package(&self, id: Uuid) -> StoreResult<Option<Package>> {
        let row = self
            .get_one::<PackageRow>(&format!("/rest/v1/packages?id=eq.{}", id))
            .await?;
        Ok(row.map(|r| Package {
            id: r.id,
            name: r.name,
            total_cost: r.total_cost,
            session_count: r.session_count,
        }))
    }

    async fn get_patient(&self, id: Uuid) -> StoreResult<Option<Patient>> {
        self.get_one(&format!("/rest/v1/patients?id=eq.{}", id)).await
    }

    async fn get_therapy(&self, id: Uuid) -> StoreResult<Option<TherapyType>> {
        self.get_one(&format!("/rest/v1/therapy_types?id=eq.{}", id)).await
    }

    async fn insert_package(&self, package: Package) -> StoreResult<Package> {
        let row = PackageRow {
            id: package.id,
            name: package.name.clone(),
            total_cost: package.total_cost,
            session_count: package.session_count,
        };
        let _: PackageRow = self.insert_row("packages", serde_json::to_value(row)?).await?;
        Ok(package)
    }

    async fn insert_patient(&self, patient: Patient) -> StoreResult<Patient> {
        self.insert_row("patients", serde_json::to_value(&patient)?).await
    }

    async fn insert_therapy(&self, therapy: TherapyType) -> StoreResult<TherapyType> {
        self.insert_row("therapy_types", serde_json::to_value(&therapy)?).await
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let path = format!("/rest/v1/bookings?{}&id=eq.{}", BOOKING_SELECT, id);
        Ok(self.get_one::<BookingRow>(&path).await?.map(Booking::from))
    }

    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        let row = self
            .get_one::<PaymentRow>(&format!("/rest/v1/payments?id=eq.{}", id))
            .await?;
        Ok(row.map(Payment::from))
    }

    async fn commit_booking(&self, draft: BookingDraft) -> StoreResult<Booking> {
        let sessions: Vec<SessionRow> = draft
            .sessions
            .iter()
            .enumerate()
            .map(|(position, session)| SessionRow::from_session(session, position))
            .collect();
        let booking_id: Uuid = self
            .rpc(
                "commit_booking",
                json!({
                    "p_draft": {
                        "patient_id": draft.patient_id,
                        "package_id": draft.package_id,
                        "therapy_id": draft.therapy_id,
                        "therapist_id": draft.therapist_id,
                        "amount": draft.amount,
                        "discount_info": draft.discount_info,
                        "remark": draft.remark,
                        "booking_request_id": draft.booking_request_id,
                        "created_at": draft.created_at,
                        "sessions": sessions,
                    }
                }),
            )
            .await?;
        self.require_booking(booking_id).await
    }

    async fn replace_booking(&self, id: Uuid, update: BookingUpdate, delta: SessionDelta) -> StoreResult<Booking> {
        let sessions: Vec<SessionRow> = update
            .sessions
            .iter()
            .enumerate()
            .map(|(position, session)| SessionRow::from_session(session, position))
            .collect();
        let _: Value = self
            .rpc(
                "replace_booking",
                json!({
                    "p_booking_id": id,
                    "p_update": {
                        "patient_id": update.patient_id,
                        "package_id": update.package_id,
                        "therapy_id": update.therapy_id,
                        "therapist_id": update.therapist_id,
                        "status": update.status,
                        "discount_info": update.discount_info,
                        "remark": update.remark,
                        "updated_at": update.updated_at,
                        "sessions": sessions,
                    },
                    "p_release": delta.to_release,
                    "p_reserve": delta.to_reserve,
                }),
            )
            .await?;
        self.require_booking(id).await
    }

    async fn delete_booking(&self, id: Uuid) -> StoreResult<Booking> {
        let booking = self.require_booking(id).await?;
        let _: Value = self.rpc("delete_booking", json!({ "p_booking_id": id })).await?;
        Ok(booking)
    }

    async fn mark_checked_in(&self, booking_id: Uuid, session_id: Uuid) -> StoreResult<CheckInOutcome> {
        let already_checked_in: bool = self
            .rpc(
                "check_in_session",
                json!({ "p_booking_id": booking_id, "p_session_id": session_id }),
            )
            .await?;
        let booking = self.require_booking(booking_id).await?;
        Ok(CheckInOutcome { booking, already_checked_in })
    }

    async fn collect_payment(
        &self,
        booking_id: Uuid,
        collection: PaymentCollection,
        at: DateTime<Utc>,
    ) -> StoreResult<Payment> {
        let (payment_type, partial_amount) = match collection {
            PaymentCollection::Full => ("full", None),
            PaymentCollection::Partial(amount) => ("partial", Some(amount)),
        };
        let row: PaymentRow = self
            .rpc(
                "collect_payment",
                json!({
                    "p_booking_id": booking_id,
                    "p_payment_type": payment_type,
                    "p_partial_amount": partial_amount,
                    "p_at": at,
                }),
            )
            .await?;
        Ok(row.into())
    }

    async fn get_booking_request(&self, id: Uuid) -> StoreResult<Option<BookingRequest>> {
        let row = self
            .get_one::<BookingRequestRow>(&format!("/rest/v1/booking_requests?id=eq.{}", id))
            .await?;
        Ok(row.map(BookingRequest::from))
    }

    async fn insert_booking_request(&self, request: BookingRequest) -> StoreResult<BookingRequest> {
        let row = BookingRequestRow {
            id: request.id,
            patient_id: request.patient_id,
            status: request.status,
            booking_id: request.booking_id,
            created_at: request.created_at,
        };
        let inserted: BookingRequestRow = self
            .insert_row("booking_requests", serde_json::to_value(row)?)
            .await?;
        Ok(inserted.into())
    }

    async fn transition_booking_request(
        &self,
        id: Uuid,
        from: ApprovalStatus,
        to: ApprovalStatus,
    ) -> StoreResult<BookingRequest> {
        // Conditional PATCH: only matches while the row still holds `from`.
        let path = format!("/rest/v1/booking_requests?id=eq.{}&status=eq.{}", id, from);
        let rows: Vec<BookingRequestRow> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(json!({ "status": to })),
                Some(return_representation()),
            )
            .await
            .map_err(translate)?;

        if let Some(row) = rows.into_iter().next() {
            return Ok(row.into());
        }
        match self.get_booking_request(id).await? {
            Some(current) => {
                warn!("Booking request {} is {}, expected {}", id, current.status, from);
                Err(StoreError::Precondition(format!(
                    "Booking request is already {}",
                    current.status
                )))
            }
            None => Err(StoreError::not_found("booking request", id)),
        }
    }

    async fn next_sequence(&self, counter: CounterName) -> StoreResult<i64> {
        self.rpc("next_sequence", json!({ "p_name": counter.as_str() })).await
    }

    async fn slot_usage(&self, date: NaiveDate, slot_id: &str) -> StoreResult<i64> {
        let path = format!(
            "/rest/v1/slot_usage?select=count&date=eq.{}&slot_id=eq.{}",
            date,
            urlencoding::encode(slot_id)
        );
        Ok(self
            .get_one::<UsageRow>(&path)
            .await?
            .map(|row| row.count)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> SupabaseStore {
        SupabaseStore::new(&TestConfig::with_supabase(&server.uri()).to_app_config())
    }

    #[tokio::test]
    async fn test_list_active_therapists_maps_holidays() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/rest/v1/therapists"))
            .and(query_param("is_active", "eq.true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::therapist_row(id, "NPL001", &[("2024-06-11", true)])
            ])))
            .mount(&server)
            .await;

        let therapists = store_for(&server).await.list_therapists(true).await.unwrap();
        assert_eq!(therapists.len(), 1);
        assert_eq!(therapists[0].display_id, "NPL001");
        assert!(therapists[0].holidays[0].is_full_day);
    }

    #[tokio::test]
    async fn test_sessions_in_range_filters_by_window() {
        let server = MockServer::start().await;
        let therapist = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/rest/v1/booking_sessions"))
            .and(query_param("order", "date.asc,slot_id.asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::ledger_row(therapist, "2024-06-10", "1000-1045", "scheduled")
            ])))
            .mount(&server)
            .await;

        let entries = store_for(&server)
            .await
            .sessions_in_range(
                &[therapist],
                NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 23).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].slot_id, "1000-1045");
    }

    #[tokio::test]
    async fn test_commit_unique_violation_becomes_conflicts() {
        let server = MockServer::start().await;
        let therapist = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/commit_booking"))
            .respond_with(ResponseTemplate::new(409).set_body_json(
                MockSupabaseResponses::slot_conflict_error(therapist, "2024-06-10", "1000-1045"),
            ))
            .mount(&server)
            .await;

        let draft = BookingDraft {
            patient_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            therapy_id: Uuid::new_v4(),
            therapist_id: therapist,
            amount: 500.0,
            sessions: vec![],
            discount_info: None,
            remark: None,
            booking_request_id: None,
            created_at: Utc::now(),
        };
        let result = store_for(&server).await.commit_booking(draft).await;
        assert_matches!(result, Err(StoreError::UniqueViolation { ref conflicts })
            if conflicts.len() == 1 && conflicts[0].key.therapist_id == therapist);
    }

    #[tokio::test]
    async fn test_precondition_from_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/collect_payment"))
            .and(body_partial_json(json!({ "p_payment_type": "partial" })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "P0001",
                "message": "This booking has no associated payment record.",
                "details": null,
                "hint": null
            })))
            .mount(&server)
            .await;

        let result = store_for(&server)
            .await
            .collect_payment(Uuid::new_v4(), PaymentCollection::Partial(10.0), Utc::now())
            .await;
        assert_matches!(result, Err(StoreError::Precondition(msg)) if msg.contains("no associated payment"));
    }

    #[tokio::test]
    async fn test_transition_reports_current_status() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/booking_requests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/booking_requests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::booking_request_row(id, "approved")
            ])))
            .mount(&server)
            .await;

        let result = store_for(&server)
            .await
            .transition_booking_request(id, ApprovalStatus::Pending, ApprovalStatus::Rejected)
            .await;
        assert_matches!(result, Err(StoreError::Precondition(msg)) if msg.contains("approved"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_opaque() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/next_sequence"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = store_for(&server).await.next_sequence(CounterName::Appointment).await;
        assert_matches!(result, Err(StoreError::Backend(_)));
    }

    const SCHEMA: &str = include_str!("../../../../migrations/0001_scheduling.sql");

    fn function_body(name: &str) -> &'static str {
        let start = SCHEMA.find(&format!("FUNCTION {}(", name)).unwrap();
        let end = start + SCHEMA[start..].find("\n$$;").unwrap();
        &SCHEMA[start..end]
    }

    #[test]
    fn test_slot_check_locks_therapists_before_reading_holidays() {
        let check = function_body("assert_slots_free");
        let lock = check.find("FOR SHARE").unwrap();
        assert!(check[..lock].contains("FROM therapists"));
        assert!(lock < check.find("therapist_holidays").unwrap());

        for unit in ["commit_booking", "replace_booking"] {
            let body = function_body(unit);
            let checked = body.find("assert_slots_free").unwrap();
            assert!(checked < body.find("insert_sessions").unwrap(), "{} writes before checking", unit);
        }

        let holidays = function_body("upsert_holidays");
        let lock = holidays.find("FROM therapists WHERE id = p_therapist_id FOR UPDATE").unwrap();
        assert!(lock < holidays.find("booking_sessions").unwrap());
    }
}
