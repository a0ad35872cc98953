use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub storage_backend: StorageBackend,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "test-service-key".to_string(),
            storage_backend: StorageBackend::Memory,
        }
    }
}

impl TestConfig {
    /// Points the Supabase backend at a mock server.
    pub fn with_supabase(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            storage_backend: StorageBackend::Supabase,
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            storage_backend: self.storage_backend,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Canned PostgREST payloads.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    /// `holidays`: (date, is_full_day) pairs; partial ones block "1000-1045".
    pub fn therapist_row(id: Uuid, display_id: &str, holidays: &[(&str, bool)]) -> Value {
        let holidays: Vec<Value> = holidays
            .iter()
            .map(|(date, full)| {
                json!({
                    "therapist_id": id,
                    "date": date,
                    "is_full_day": full,
                    "slots": if *full { json!([]) } else { json!([{ "slotId": "1000-1045", "label": "10:00 to 10:45" }]) },
                    "reason": ""
                })
            })
            .collect();
        json!({
            "id": id,
            "display_id": display_id,
            "name": format!("Therapist {}", display_id),
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "therapist_holidays": holidays
        })
    }

    pub fn ledger_row(therapist_id: Uuid, date: &str, slot_id: &str, status: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "booking_id": Uuid::new_v4(),
            "date": date,
            "slot_id": slot_id,
            "therapist_id": therapist_id,
            "status": status
        })
    }

    /// What `assert_slots_free` raises through PostgREST.
    pub fn slot_conflict_error(therapist_id: Uuid, date: &str, slot_id: &str) -> Value {
        let details = json!([{
            "date": date,
            "slot_id": slot_id,
            "therapist_id": therapist_id,
            "reason": "booked"
        }]);
        json!({
            "code": "23505",
            "message": "slot_conflict",
            "details": details.to_string(),
            "hint": null
        })
    }

    pub fn booking_request_row(id: Uuid, status: &str) -> Value {
        json!({
            "id": id,
            "patient_id": null,
            "status": status,
            "booking_id": null,
            "created_at": "2024-06-01T00:00:00Z"
        })
    }

    pub fn error_response(code: &str, message: &str) -> Value {
        json!({
            "code": code,
            "message": message,
            "details": null,
            "hint": null
        })
    }
}
