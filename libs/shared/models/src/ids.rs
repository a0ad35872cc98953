//! Human-readable identifiers minted from the named counters.

use std::fmt;

/// Logical id namespaces, one counter row each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterName {
    Appointment,
    Payment,
    Therapist,
}

impl CounterName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterName::Appointment => "appointment",
            CounterName::Payment => "payment",
            CounterName::Therapist => "therapist",
        }
    }
}

impl fmt::Display for CounterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn appointment_id(seq: i64) -> String {
    format!("APT{:06}", seq)
}

pub fn invoice_number(year: i32, seq: i64) -> String {
    format!("INV-{}-{:05}", year, seq)
}

pub fn therapist_display_id(seq: i64) -> String {
    format!("NPL{:03}", seq)
}
