use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use shared_database::{AppState, SchedulingStore};
use shared_models::scheduling::{Booking, Payment, PaymentCollection, PaymentRuleError, PaymentStatus};

use crate::models::{BookingError, CollectPaymentRequest};

/// Result of a collection, with the message shown to front-desk staff.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub message: &'static str,
    pub booking: Booking,
    pub payment: Payment,
}

pub struct PaymentService {
    store: Arc<dyn SchedulingStore>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(state.store.clone())
    }

    /// Records a full or partial payment. `paymentType` defaults to full.
    #[instrument(skip(self, request))]
    pub async fn collect_payment(
        &self,
        booking_id: Uuid,
        request: CollectPaymentRequest,
    ) -> Result<PaymentReceipt, BookingError> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking not found".to_string()))?;
        let payment_id = booking.payment_id.ok_or_else(|| {
            BookingError::Validation("This booking has no associated payment record.".to_string())
        })?;
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Associated payment not found.".to_string()))?;

        let collection = match request.payment_type.as_deref().map(str::trim).unwrap_or("full") {
            "full" => PaymentCollection::Full,
            "partial" => {
                let remaining = payment.remaining();
                let amount = parse_amount(request.partial_amount.as_ref())
                    .filter(|amount| amount.is_finite() && *amount > 0.0 && *amount <= remaining)
                    .ok_or_else(|| {
                        BookingError::Validation(PaymentRuleError::InvalidPartialAmount { remaining }.to_string())
                    })?;
                PaymentCollection::Partial(amount)
            }
            other => {
                return Err(BookingError::Validation(format!(
                    "Unsupported paymentType '{}'; expected 'full' or 'partial'",
                    other
                )))
            }
        };

        let updated = self.store.collect_payment(booking_id, collection, Utc::now()).await?;
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking not found".to_string()))?;

        let message = match collection {
            PaymentCollection::Partial(_) if updated.status == PaymentStatus::Paid => {
                "Partial payment received. Booking now fully paid."
            }
            PaymentCollection::Partial(_) => "Partial payment received. Remaining balance is due.",
            PaymentCollection::Full => "Payment recorded successfully.",
        };
        info!(
            "Payment {} for booking {}: paid {} of {}",
            updated.invoice_number, booking.appointment_id, updated.amount_paid, updated.amount
        );

        Ok(PaymentReceipt { message, booking, payment: updated })
    }
}

/// Accepts a JSON number or a numeric string.
fn parse_amount(raw: Option<&Value>) -> Option<f64> {
    match raw? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
