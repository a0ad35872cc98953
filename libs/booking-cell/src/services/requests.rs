use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use shared_database::{AppState, SchedulingStore};
use shared_models::scheduling::{ApprovalStatus, BookingRequest};

use crate::models::BookingError;
use crate::services::lifecycle::BookingLifecycleService;

/// Patient-initiated booking requests. Approval happens when a booking is
/// created from the request; this service covers lookup and rejection.
pub struct BookingRequestService {
    store: Arc<dyn SchedulingStore>,
    lifecycle: BookingLifecycleService,
}

impl BookingRequestService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store, lifecycle: BookingLifecycleService::new() }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(state.store.clone())
    }

    pub async fn get_request(&self, id: Uuid) -> Result<BookingRequest, BookingError> {
        self.store
            .get_booking_request(id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Booking request not found.".to_string()))
    }

    pub async fn reject_request(&self, id: Uuid) -> Result<BookingRequest, BookingError> {
        let request = self.get_request(id).await?;

        match request.status {
            ApprovalStatus::Rejected => {
                return Err(BookingError::Validation("Booking request already rejected.".to_string()))
            }
            ApprovalStatus::Approved => {
                warn!("Refusing to reject approved booking request {}", id);
                return Err(BookingError::Validation(
                    "Booking request already approved. Cannot reject.".to_string(),
                ));
            }
            ApprovalStatus::Pending => {}
        }
        self.lifecycle
            .validate_status_transition(request.status, ApprovalStatus::Rejected)?;

        // Compare-and-set: a concurrent approval wins over this rejection.
        let rejected = self
            .store
            .transition_booking_request(id, ApprovalStatus::Pending, ApprovalStatus::Rejected)
            .await?;
        info!("Booking request {} rejected", id);
        Ok(rejected)
    }
}
