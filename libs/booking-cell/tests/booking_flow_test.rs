use assert_matches::assert_matches;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use booking_cell::models::{
    BookingError, CheckInRequest, CollectPaymentRequest, CouponRef, CreateBookingRequest, SessionInput,
    UpdateBookingRequest,
};
use booking_cell::services::{BookingCoordinator, BookingRequestService, PaymentService};
use shared_database::fixtures::ClinicFixture;
use shared_database::SchedulingStore;
use shared_models::error::AppError;
use shared_models::ids;
use shared_models::scheduling::{ApprovalStatus, Holiday, OccupancyReason, PaymentStatus};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn session(day: &str, slot: &str, therapist: &str) -> SessionInput {
    SessionInput {
        date: Some(day.to_string()),
        slot_id: Some(slot.to_string()),
        therapist_id: Some(therapist.to_string()),
        ..Default::default()
    }
}

fn create_request(fixture: &ClinicFixture, sessions: Vec<SessionInput>) -> CreateBookingRequest {
    CreateBookingRequest {
        package: Some(fixture.package.id.to_string()),
        patient: Some(fixture.patient.id.to_string()),
        therapy: Some(fixture.therapy.id.to_string()),
        therapist: Some("NPL001".to_string()),
        sessions,
        ..Default::default()
    }
}

fn update_request(fixture: &ClinicFixture, sessions: Vec<SessionInput>) -> UpdateBookingRequest {
    UpdateBookingRequest {
        package: Some(fixture.package.id.to_string()),
        patient: Some(fixture.patient.id.to_string()),
        therapy: Some(fixture.therapy.id.to_string()),
        sessions,
        ..Default::default()
    }
}

async fn setup() -> (ClinicFixture, BookingCoordinator) {
    let fixture = ClinicFixture::seed().await.unwrap();
    let coordinator = BookingCoordinator::from_state(&fixture.state());
    (fixture, coordinator)
}

// ==============================================================================
// CREATE
// ==============================================================================

#[tokio::test]
async fn test_create_populates_booking() {
    let (fixture, coordinator) = setup().await;

    let populated = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap();

    assert_eq!(populated.booking.appointment_id, ids::appointment_id(1));
    assert_eq!(populated.booking.status, ApprovalStatus::Pending);
    assert_eq!(populated.booking.sessions[0].time, "10:00 to 10:45");
    assert_eq!(populated.booking.sessions[0].therapist_display_id.as_deref(), Some("NPL001"));
    assert_eq!(populated.booking.sessions[0].therapy_type_id, Some(fixture.therapy.id));
    assert_eq!(populated.patient.unwrap().id, fixture.patient.id);
    assert_eq!(populated.therapist.unwrap().display_id, "NPL001");
    let payment = populated.payment.unwrap();
    assert_eq!(payment.amount, 12000.0);
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(fixture.store.slot_usage(date("2024-06-10"), "1000-1045").await.unwrap(), 1);
}

#[tokio::test]
async fn test_second_booking_on_same_slot_conflicts() {
    let (fixture, coordinator) = setup().await;
    coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap();

    let result = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await;

    assert_matches!(result, Err(BookingError::Conflicts { ref conflicts, ref availability }) => {
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, OccupancyReason::Booked);
        assert_eq!(conflicts[0].therapist_display_id, "NPL001");
        let snapshot = availability.as_ref().unwrap().get("NPL001").unwrap();
        assert!(snapshot.day(date("2024-06-10")).unwrap().is_booked("NPL001", "1000-1045"));
    });
    assert_eq!(fixture.store.slot_usage(date("2024-06-10"), "1000-1045").await.unwrap(), 1);
}

#[tokio::test]
async fn test_every_conflict_reported_and_nothing_written() {
    let (fixture, coordinator) = setup().await;
    coordinator
        .create_booking(create_request(
            &fixture,
            vec![session("2024-06-10", "1000-1045", "NPL001"), session("2024-06-12", "1130-1215", "NPL001")],
        ))
        .await
        .unwrap();

    let result = coordinator
        .create_booking(create_request(
            &fixture,
            vec![
                session("2024-06-10", "1000-1045", "NPL001"),
                session("2024-06-11", "1000-1045", "NPL001"),
                session("2024-06-12", "1130-1215", "NPL001"),
            ],
        ))
        .await;

    assert_matches!(result, Err(BookingError::Conflicts { ref conflicts, .. }) => {
        let dates: Vec<&str> = conflicts.iter().map(|c| c.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-06-10", "2024-06-12"]);
    });
    assert_eq!(fixture.store.slot_usage(date("2024-06-11"), "1000-1045").await.unwrap(), 0);
}

#[tokio::test]
async fn test_far_apart_dates_only_check_requested_days() {
    let (fixture, coordinator) = setup().await;
    coordinator
        .create_booking(create_request(
            &fixture,
            vec![session("1000-01-01", "1000-1045", "NPL001"), session("9999-12-31", "1000-1045", "NPL001")],
        ))
        .await
        .unwrap();
    assert_eq!(fixture.store.slot_usage(date("9999-12-31"), "1000-1045").await.unwrap(), 1);

    let result = coordinator
        .create_booking(create_request(
            &fixture,
            vec![session("1000-01-01", "1045-1130", "NPL001"), session("9999-12-31", "1000-1045", "NPL001")],
        ))
        .await;

    assert_matches!(result, Err(BookingError::Conflicts { ref conflicts, ref availability }) => {
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].date, "9999-12-31");
        let snapshot = availability.as_ref().unwrap().get("NPL001").unwrap();
        let days: Vec<_> = snapshot.days.iter().map(|(key, _)| key.iso).collect();
        assert_eq!(days, vec![date("1000-01-01"), date("9999-12-31")]);
    });
}

#[tokio::test]
async fn test_same_slot_different_therapist_is_free() {
    let (fixture, coordinator) = setup().await;
    coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap();

    let second = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL002")]))
        .await
        .unwrap();

    assert_eq!(second.booking.sessions[0].therapist_display_id.as_deref(), Some("NPL002"));
}

#[tokio::test]
async fn test_holiday_is_a_conflict() {
    let (fixture, coordinator) = setup().await;
    let asha = fixture.therapist("NPL001").unwrap().id;
    fixture
        .store
        .upsert_holidays(asha, vec![Holiday::full_day(date("2024-06-11"), "Leave")])
        .await
        .unwrap();

    let err = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-11", "1800-1845", "NPL001")]))
        .await
        .unwrap_err();

    assert_matches!(err, BookingError::Conflicts { ref conflicts, .. } if conflicts[0].reason == OccupancyReason::Holiday);
    assert_matches!(AppError::from(err), AppError::Conflict { ref message, .. } if message.contains("unavailable"));
}

#[tokio::test]
async fn test_failed_create_consumes_no_identifiers() {
    let (fixture, coordinator) = setup().await;
    coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap();
    let _ = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap_err();

    let next = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1045-1130", "NPL001")]))
        .await
        .unwrap();
    assert_eq!(next.booking.appointment_id, ids::appointment_id(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_on_one_slot_admit_exactly_one() {
    let (fixture, coordinator) = setup().await;
    let coordinator = Arc::new(coordinator);

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            let request = create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]);
            tokio::spawn(async move { coordinator.create_booking(request).await })
        })
        .collect();

    let mut admitted = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(err) => assert_matches!(err, BookingError::Conflicts { .. }),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(fixture.store.slot_usage(date("2024-06-10"), "1000-1045").await.unwrap(), 1);
}

// ==============================================================================
// VALIDATION
// ==============================================================================

#[tokio::test]
async fn test_create_validation_errors() {
    let (fixture, coordinator) = setup().await;

    let mut missing = create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]);
    missing.therapist = None;
    assert_matches!(
        coordinator.create_booking(missing).await,
        Err(BookingError::Validation(ref msg)) if msg == "Missing required fields"
    );

    assert_matches!(
        coordinator.create_booking(create_request(&fixture, vec![])).await,
        Err(BookingError::Validation(ref msg)) if msg == "Missing required fields"
    );

    assert_matches!(
        coordinator
            .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL999")]))
            .await,
        Err(BookingError::Validation(ref msg)) if msg.contains("do not exist")
    );

    assert_matches!(
        coordinator
            .create_booking(create_request(&fixture, vec![session("10/06/2024", "1000-1045", "NPL001")]))
            .await,
        Err(BookingError::Validation(ref msg)) if msg.starts_with("Invalid session data")
    );

    assert_matches!(
        coordinator
            .create_booking(create_request(&fixture, vec![session("2024-06-10", "0900-0945", "NPL001")]))
            .await,
        Err(BookingError::Validation(ref msg)) if msg.contains("0900-0945")
    );

    let mut unknown_package = create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]);
    unknown_package.package = Some(Uuid::new_v4().to_string());
    assert_matches!(
        coordinator.create_booking(unknown_package).await,
        Err(BookingError::Validation(ref msg)) if msg == "Invalid package"
    );

    let duplicate = create_request(
        &fixture,
        vec![session("2024-06-10", "1000-1045", "NPL001"), session("2024-06-10", "1000-1045", "NPL001")],
    );
    assert_matches!(coordinator.create_booking(duplicate).await, Err(BookingError::Validation(_)));
}

#[tokio::test]
async fn test_inactive_therapist_cannot_be_booked() {
    let fixture = ClinicFixture::with_therapists(&[("Asha Menon", true), ("Old Hand", false)])
        .await
        .unwrap();
    let coordinator = BookingCoordinator::from_state(&fixture.state());

    let result = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL002")]))
        .await;

    assert_matches!(result, Err(BookingError::Validation(ref msg)) if msg.contains("not active"));
}

#[tokio::test]
async fn test_session_falls_back_to_booking_therapist() {
    let (fixture, coordinator) = setup().await;
    let mut request = create_request(
        &fixture,
        vec![SessionInput {
            date: Some("2024-06-10".into()),
            id: Some("1130-1215".into()),
            ..Default::default()
        }],
    );
    request.therapist = Some("NPL002".into());

    let populated = coordinator.create_booking(request).await.unwrap();
    assert_eq!(populated.booking.sessions[0].slot_id, "1130-1215");
    assert_eq!(populated.booking.sessions[0].therapist_display_id.as_deref(), Some("NPL002"));
}

// ==============================================================================
// UPDATE / DELETE
// ==============================================================================

#[tokio::test]
async fn test_update_keeps_unchanged_sessions_and_moves_usage() {
    let (fixture, coordinator) = setup().await;
    let created = coordinator
        .create_booking(create_request(
            &fixture,
            vec![session("2024-06-10", "1000-1045", "NPL001"), session("2024-06-11", "1000-1045", "NPL001")],
        ))
        .await
        .unwrap()
        .booking;
    let kept = created.sessions[0].clone();
    coordinator
        .check_in(CheckInRequest {
            booking_id: Some(created.id.to_string()),
            session_id: Some(kept.id.to_string()),
        })
        .await
        .unwrap();

    let updated = coordinator
        .update_booking(
            created.id,
            update_request(
                &fixture,
                vec![session("2024-06-10", "1000-1045", "NPL001"), session("2024-06-12", "1045-1130", "NPL001")],
            ),
        )
        .await
        .unwrap()
        .booking;

    assert_eq!(updated.sessions[0].id, kept.id);
    assert!(updated.sessions[0].is_checked_in);
    assert_eq!(updated.therapist_id, created.therapist_id);
    assert_eq!(fixture.store.slot_usage(date("2024-06-10"), "1000-1045").await.unwrap(), 1);
    assert_eq!(fixture.store.slot_usage(date("2024-06-11"), "1000-1045").await.unwrap(), 0);
    assert_eq!(fixture.store.slot_usage(date("2024-06-12"), "1045-1130").await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_into_another_booking_conflicts() {
    let (fixture, coordinator) = setup().await;
    coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap();
    let mine = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1045-1130", "NPL001")]))
        .await
        .unwrap()
        .booking;

    let result = coordinator
        .update_booking(mine.id, update_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await;

    assert_matches!(result, Err(BookingError::Conflicts { ref conflicts, .. }) if conflicts.len() == 1);
    let unchanged = fixture.store.get_booking(mine.id).await.unwrap().unwrap();
    assert_eq!(unchanged.sessions[0].slot_id, "1045-1130");
}

#[tokio::test]
async fn test_update_retains_coupon_and_checks_status() {
    let (fixture, coordinator) = setup().await;
    let mut request = create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]);
    request.coupon = Some(CouponRef::Id("WELCOME10".into()));
    let created = coordinator.create_booking(request).await.unwrap().booking;

    let mut approve = update_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]);
    approve.status = Some(ApprovalStatus::Approved);
    let approved = coordinator.update_booking(created.id, approve).await.unwrap().booking;
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.discount_info.unwrap().coupon, "WELCOME10");

    let mut reopen = update_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]);
    reopen.status = Some(ApprovalStatus::Pending);
    assert_matches!(
        coordinator.update_booking(created.id, reopen).await,
        Err(BookingError::InvalidStatusTransition { from: ApprovalStatus::Approved, to: ApprovalStatus::Pending })
    );
}

#[tokio::test]
async fn test_update_missing_booking_is_not_found() {
    let (fixture, coordinator) = setup().await;
    let result = coordinator
        .update_booking(Uuid::new_v4(), update_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await;
    assert_matches!(result, Err(BookingError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_releases_usage() {
    let (fixture, coordinator) = setup().await;
    let created = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap()
        .booking;

    coordinator.delete_booking(created.id).await.unwrap();

    assert_eq!(fixture.store.slot_usage(date("2024-06-10"), "1000-1045").await.unwrap(), 0);
    assert_matches!(coordinator.delete_booking(created.id).await, Err(BookingError::NotFound(_)));
    coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap();
}

// ==============================================================================
// CHECK-IN
// ==============================================================================

#[tokio::test]
async fn test_check_in_is_idempotent() {
    let (fixture, coordinator) = setup().await;
    let created = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap()
        .booking;
    let request = CheckInRequest {
        booking_id: Some(created.id.to_string()),
        session_id: Some(created.sessions[0].id.to_string()),
    };

    let (booking, already) = coordinator.check_in(request.clone()).await.unwrap();
    assert!(!already);
    assert!(booking.sessions[0].is_checked_in);

    let (_, already) = coordinator.check_in(request).await.unwrap();
    assert!(already);
}

#[tokio::test]
async fn test_check_in_errors() {
    let (fixture, coordinator) = setup().await;
    let created = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap()
        .booking;

    assert_matches!(
        coordinator
            .check_in(CheckInRequest { booking_id: Some(created.id.to_string()), session_id: None })
            .await,
        Err(BookingError::Validation(ref msg)) if msg == "bookingId and sessionId are required."
    );
    assert_matches!(
        coordinator
            .check_in(CheckInRequest {
                booking_id: Some(created.id.to_string()),
                session_id: Some(Uuid::new_v4().to_string()),
            })
            .await,
        Err(BookingError::NotFound(ref msg)) if msg == "Session not found in this booking."
    );
}

// ==============================================================================
// PAYMENTS
// ==============================================================================

#[tokio::test]
async fn test_partial_then_full_payment() {
    let (fixture, coordinator) = setup().await;
    let created = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap()
        .booking;
    let payments = PaymentService::from_state(&fixture.state());

    let receipt = payments
        .collect_payment(
            created.id,
            CollectPaymentRequest { payment_type: Some("partial".into()), partial_amount: Some(json!(5000)) },
        )
        .await
        .unwrap();
    assert_eq!(receipt.message, "Partial payment received. Remaining balance is due.");
    assert_eq!(receipt.payment.amount_paid, 5000.0);
    assert_eq!(receipt.booking.payment_status, PaymentStatus::PartiallyPaid);

    let too_much = payments
        .collect_payment(
            created.id,
            CollectPaymentRequest { payment_type: Some("partial".into()), partial_amount: Some(json!("7001")) },
        )
        .await;
    assert_matches!(too_much, Err(BookingError::Validation(ref msg)) if msg.contains("7000"));

    let receipt = payments
        .collect_payment(
            created.id,
            CollectPaymentRequest { payment_type: Some("partial".into()), partial_amount: Some(json!("7000")) },
        )
        .await
        .unwrap();
    assert_eq!(receipt.message, "Partial payment received. Booking now fully paid.");
    assert_eq!(receipt.booking.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_full_payment_is_default() {
    let (fixture, coordinator) = setup().await;
    let created = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap()
        .booking;

    let receipt = PaymentService::from_state(&fixture.state())
        .collect_payment(created.id, CollectPaymentRequest::default())
        .await
        .unwrap();

    assert_eq!(receipt.message, "Payment recorded successfully.");
    assert_eq!(receipt.payment.amount_paid, 12000.0);
    assert_eq!(receipt.payment.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_partial_amount_must_be_positive() {
    let (fixture, coordinator) = setup().await;
    let created = coordinator
        .create_booking(create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]))
        .await
        .unwrap()
        .booking;

    let result = PaymentService::from_state(&fixture.state())
        .collect_payment(
            created.id,
            CollectPaymentRequest { payment_type: Some("partial".into()), partial_amount: Some(json!(0)) },
        )
        .await;

    assert_matches!(result, Err(BookingError::Validation(ref msg)) if msg.starts_with("Partial amount to pay"));
}

// ==============================================================================
// BOOKING REQUESTS
// ==============================================================================

#[tokio::test]
async fn test_create_from_request_approves_it() {
    let (fixture, coordinator) = setup().await;
    let pending = fixture.pending_request().await.unwrap();
    let mut request = create_request(&fixture, vec![session("2024-06-10", "1000-1045", "NPL001")]);
    request.is_booking_request = true;
    request.booking_request_id = Some(pending.id.to_string());

    let booking = coordinator.create_booking(request.clone()).await.unwrap().booking;

    let service = BookingRequestService::from_state(&fixture.state());
    let approved = service.get_request(pending.id).await.unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.booking_id, Some(booking.id));
    assert_eq!(booking.booking_request_id, Some(pending.id));

    assert_matches!(
        service.reject_request(pending.id).await,
        Err(BookingError::Validation(ref msg)) if msg == "Booking request already approved. Cannot reject."
    );

    request.sessions = vec![session("2024-06-11", "1000-1045", "NPL001")];
    assert_matches!(
        coordinator.create_booking(request).await,
        Err(BookingError::Validation(ref msg)) if msg == "Booking request is already approved"
    );
}

#[tokio::test]
async fn test_reject_request() {
    let fixture = ClinicFixture::seed().await.unwrap();
    let service = BookingRequestService::from_state(&fixture.state());
    let pending = fixture.pending_request().await.unwrap();

    let rejected = service.reject_request(pending.id).await.unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);

    assert_matches!(
        service.reject_request(pending.id).await,
        Err(BookingError::Validation(ref msg)) if msg == "Booking request already rejected."
    );
    assert_matches!(
        service.reject_request(Uuid::new_v4()).await,
        Err(BookingError::NotFound(ref msg)) if msg == "Booking request not found."
    );
}
