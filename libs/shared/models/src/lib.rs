pub mod error;
pub mod ids;
pub mod scheduling;
pub mod slots;
