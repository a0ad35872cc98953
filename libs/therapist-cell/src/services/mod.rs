pub mod availability;
pub mod holiday;

pub use availability::AvailabilitySummarizer;
pub use holiday::HolidayService;
