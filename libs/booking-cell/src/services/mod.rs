pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod payment;
pub mod requests;

pub use booking::BookingCoordinator;
pub use conflict::ConflictDetectionService;
pub use lifecycle::BookingLifecycleService;
pub use payment::{PaymentReceipt, PaymentService};
pub use requests::BookingRequestService;
