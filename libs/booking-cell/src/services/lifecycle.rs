use tracing::{debug, warn};

use shared_models::scheduling::ApprovalStatus;

use crate::models::BookingError;

/// Transition table shared by bookings and booking requests.
pub struct BookingLifecycleService;

impl BookingLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Keeping the current status is always allowed and is a no-op.
    pub fn validate_status_transition(
        &self,
        current_status: ApprovalStatus,
        new_status: ApprovalStatus,
    ) -> Result<(), BookingError> {
        if current_status == new_status {
            return Ok(());
        }
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(BookingError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }
        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: ApprovalStatus) -> Vec<ApprovalStatus> {
        match current_status {
            ApprovalStatus::Pending => vec![ApprovalStatus::Approved, ApprovalStatus::Rejected],
            // Terminal
            ApprovalStatus::Approved => vec![],
            ApprovalStatus::Rejected => vec![],
        }
    }

    pub fn is_terminal(&self, status: ApprovalStatus) -> bool {
        self.get_valid_transitions(status).is_empty()
    }
}

impl Default for BookingLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
