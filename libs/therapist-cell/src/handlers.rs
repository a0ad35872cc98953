use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use shared_database::AppState;
use shared_models::error::AppError;
use shared_models::slots::SlotCatalog;
use shared_utils::dates;
use shared_utils::extractor::ValidatedJson;

use crate::models::{AvailabilityQuery, MonthlyAvailabilityQuery, SetHolidayRequest};
use crate::services::availability::{parse_month, resolve_window};
use crate::services::{AvailabilitySummarizer, HolidayService};

// ==============================================================================
// SLOT CATALOG & AVAILABILITY
// ==============================================================================

#[axum::debug_handler]
pub async fn list_slots() -> Result<Json<Value>, AppError> {
    let catalog = SlotCatalog::standard();
    Ok(Json(json!({
        "success": true,
        "version": catalog.version(),
        "slots": catalog.all_slots(),
    })))
}

#[axum::debug_handler]
pub async fn get_availability_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let today = dates::clinic_today(state.config.clinic_utc_offset_minutes);
    let (from, to) = resolve_window(
        query.from.as_deref(),
        query.to.as_deref(),
        today,
        state.config.availability_window_days,
    )?;

    let summary = AvailabilitySummarizer::from_state(&state)
        .summarize(query.therapist_id.as_deref(), from, to)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": summary,
    })))
}

#[axum::debug_handler]
pub async fn get_monthly_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MonthlyAvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let (month, year) = parse_month(query.month.as_deref(), query.year.as_deref())?;

    let summary = AvailabilitySummarizer::from_state(&state)
        .summarize_month(query.therapist_id.as_deref(), month, year)
        .await?;

    Ok(Json(json!({
        "success": true,
        "month": month,
        "year": year,
        "data": summary,
    })))
}

// ==============================================================================
// HOLIDAYS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_holidays(
    State(state): State<Arc<AppState>>,
    Path(therapist_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let holidays = HolidayService::from_state(&state)
        .list_holidays(&therapist_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "holidays": holidays,
    })))
}

#[axum::debug_handler]
pub async fn set_holidays(
    State(state): State<Arc<AppState>>,
    Path(therapist_id): Path<String>,
    ValidatedJson(request): ValidatedJson<SetHolidayRequest>,
) -> Result<Json<Value>, AppError> {
    let holidays = HolidayService::from_state(&state)
        .set_holidays(&therapist_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Holidays updated successfully",
        "holidays": holidays,
    })))
}
