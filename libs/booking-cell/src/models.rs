use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::scheduling::{ApprovalStatus, OccupancyReason};
use therapist_cell::models::{AvailabilityError, AvailabilitySummary};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Coupon as sent by clients: a bare id or an object carrying one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CouponRef {
    Id(String),
    Object { id: String },
}

impl CouponRef {
    pub fn id(&self) -> Option<&str> {
        let id = match self {
            CouponRef::Id(id) => id,
            CouponRef::Object { id } => id,
        };
        Some(id.trim()).filter(|id| !id.is_empty())
    }
}

/// One requested session. `slotId` falls back to `id`, `therapistId` to
/// `therapist`, then to the booking-level therapist.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    pub date: Option<String>,
    pub slot_id: Option<String>,
    pub id: Option<String>,
    pub therapist_id: Option<String>,
    pub therapist: Option<String>,
    pub therapy_type_id: Option<String>,
    pub therapy_type: Option<String>,
    pub time: Option<String>,
}

impl SessionInput {
    pub fn slot_ref(&self) -> Option<&str> {
        non_blank(self.slot_id.as_deref()).or_else(|| non_blank(self.id.as_deref()))
    }

    pub fn therapist_ref(&self) -> Option<&str> {
        non_blank(self.therapist_id.as_deref()).or_else(|| non_blank(self.therapist.as_deref()))
    }

    pub fn therapy_ref(&self) -> Option<&str> {
        non_blank(self.therapy_type_id.as_deref()).or_else(|| non_blank(self.therapy_type.as_deref()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub package: Option<String>,
    pub patient: Option<String>,
    pub therapy: Option<String>,
    pub therapist: Option<String>,
    #[serde(default)]
    pub sessions: Vec<SessionInput>,
    pub coupon: Option<CouponRef>,
    pub remark: Option<String>,
    #[serde(default)]
    pub is_booking_request: bool,
    pub booking_request_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    pub package: Option<String>,
    pub patient: Option<String>,
    pub therapy: Option<String>,
    pub therapist: Option<String>,
    #[serde(default)]
    pub sessions: Vec<SessionInput>,
    pub coupon: Option<CouponRef>,
    pub remark: Option<String>,
    pub status: Option<ApprovalStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub booking_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectPaymentRequest {
    pub payment_type: Option<String>,
    /// Number or numeric string.
    pub partial_amount: Option<Value>,
}

pub(crate) fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|raw| !raw.is_empty())
}

// ==============================================================================
// CONFLICTS & PHASES
// ==============================================================================

/// One (date, slot, therapist) triple that cannot be taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictItem {
    pub date: String,
    pub slot_id: String,
    pub therapist_id: Uuid,
    pub therapist_display_id: String,
    pub reason: OccupancyReason,
}

/// Stages of one create/update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    Validating,
    AvailabilityChecking,
    Reserving,
    Committing,
    Committed,
    Aborted,
}

impl BookingPhase {
    pub fn can_transition_to(self, next: BookingPhase) -> bool {
        use BookingPhase::*;
        match (self, next) {
            (Committed | Aborted, _) => false,
            (_, Aborted) => true,
            (Validating, AvailabilityChecking)
            | (AvailabilityChecking, Reserving)
            | (Reserving, Committing)
            | (Committing, Committed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BookingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookingPhase::Validating => "validating",
            BookingPhase::AvailabilityChecking => "availability_checking",
            BookingPhase::Reserving => "reserving",
            BookingPhase::Committing => "committing",
            BookingPhase::Committed => "committed",
            BookingPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{} conflicting session(s)", conflicts.len())]
    Conflicts {
        conflicts: Vec<ConflictItem>,
        /// Per-therapist snapshot the check ran against, keyed by display id.
        availability: Option<BTreeMap<String, AvailabilitySummary>>,
    },

    #[error("Cannot change status from {from} to {to}")]
    InvalidStatusTransition { from: ApprovalStatus, to: ApprovalStatus },

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(msg) => AppError::ValidationError(msg),
            BookingError::NotFound(msg) => AppError::NotFound(msg),
            BookingError::Conflicts { conflicts, availability } => {
                let message = if conflicts.iter().any(|c| c.reason == OccupancyReason::Holiday) {
                    "Selected therapist/time slot is unavailable for one or more session dates."
                } else {
                    "Selected therapist/time slot already booked for one or more session dates."
                };
                let mut details = json!({ "conflicts": conflicts });
                if let Some(availability) = availability {
                    details["allSlotAvailabilityData"] = json!(availability);
                }
                AppError::Conflict { message: message.to_string(), details }
            }
            err @ BookingError::InvalidStatusTransition { .. } => AppError::ValidationError(err.to_string()),
            BookingError::Availability(err) => err.into(),
            BookingError::Store(err) => err.into(),
        }
    }
}
