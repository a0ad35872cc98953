use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use shared_database::AppState;
use shared_models::error::AppError;
use shared_utils::extractor::ValidatedJson;

use crate::models::{CheckInRequest, CollectPaymentRequest, CreateBookingRequest, UpdateBookingRequest};
use crate::services::booking::parse_id;
use crate::services::{BookingCoordinator, BookingRequestService, PaymentService};

// ==============================================================================
// BOOKINGS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let booking = BookingCoordinator::from_state(&state).create_booking(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "booking": booking,
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let booking_id = parse_id(&booking_id, "booking")?;
    let booking = BookingCoordinator::from_state(&state).get_booking(booking_id).await?;

    Ok(Json(json!({
        "success": true,
        "booking": booking,
    })))
}

#[axum::debug_handler]
pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    ValidatedJson(request): ValidatedJson<UpdateBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_id = parse_id(&booking_id, "booking")?;
    let booking = BookingCoordinator::from_state(&state)
        .update_booking(booking_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "booking": booking,
    })))
}

#[axum::debug_handler]
pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let booking_id = parse_id(&booking_id, "booking")?;
    BookingCoordinator::from_state(&state).delete_booking(booking_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Booking deleted successfully.",
    })))
}

#[axum::debug_handler]
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CheckInRequest>,
) -> Result<Json<Value>, AppError> {
    let (booking, already_checked_in) = BookingCoordinator::from_state(&state).check_in(request).await?;

    let message = if already_checked_in {
        "Patient already checked in for this session."
    } else {
        "Patient checked in successfully for this session."
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "alreadyCheckedIn": already_checked_in,
        "booking": booking,
    })))
}

#[axum::debug_handler]
pub async fn collect_payment(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    ValidatedJson(request): ValidatedJson<CollectPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_id = parse_id(&booking_id, "booking")?;
    let receipt = PaymentService::from_state(&state)
        .collect_payment(booking_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": receipt.message,
        "booking": receipt.booking,
        "payment": receipt.payment,
    })))
}

// ==============================================================================
// BOOKING REQUESTS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_booking_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let request_id = parse_id(&request_id, "booking request")?;
    let request = BookingRequestService::from_state(&state).get_request(request_id).await?;

    Ok(Json(json!({
        "success": true,
        "bookingRequest": request,
    })))
}

#[axum::debug_handler]
pub async fn reject_booking_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let request_id = parse_id(&request_id, "booking request")?;
    let request = BookingRequestService::from_state(&state)
        .reject_request(request_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Booking request rejected successfully.",
        "bookingRequest": request,
    })))
}
