//! Seeded in-memory clinic used by the cells' tests and local runs.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::scheduling::{
    ApprovalStatus, BookingRequest, Package, Patient, Therapist, TherapyType,
};

use crate::memory::MemoryStore;
use crate::state::AppState;
use crate::store::{NewTherapist, SchedulingStore, StoreError, StoreResult};

pub struct ClinicFixture {
    pub store: Arc<MemoryStore>,
    /// In seeding order: NPL001, NPL002, ...
    pub therapists: Vec<Therapist>,
    pub patient: Patient,
    pub package: Package,
    pub therapy: TherapyType,
}

impl ClinicFixture {
    /// Two active therapists, one patient, one package and one therapy type.
    pub async fn seed() -> StoreResult<Self> {
        Self::with_therapists(&[("Asha Menon", true), ("Ravi Kumar", true)]).await
    }

    pub async fn with_therapists(therapists: &[(&str, bool)]) -> StoreResult<Self> {
        let store = Arc::new(MemoryStore::new());

        let mut seeded = Vec::with_capacity(therapists.len());
        for (name, is_active) in therapists {
            seeded.push(
                store
                    .insert_therapist(NewTherapist { name: name.to_string(), is_active: *is_active })
                    .await?,
            );
        }

        let patient = store
            .insert_patient(Patient {
                id: Uuid::new_v4(),
                name: "Meera Pillai".to_string(),
                phone: Some("+91-9000000001".to_string()),
            })
            .await?;
        let package = store
            .insert_package(Package {
                id: Uuid::new_v4(),
                name: "Speech Therapy x10".to_string(),
                total_cost: 12000.0,
                session_count: Some(10),
            })
            .await?;
        let therapy = store
            .insert_therapy(TherapyType { id: Uuid::new_v4(), name: "Speech Therapy".to_string() })
            .await?;

        Ok(Self { store, therapists: seeded, patient, package, therapy })
    }

    pub fn therapist(&self, display_id: &str) -> StoreResult<&Therapist> {
        self.therapists
            .iter()
            .find(|t| t.display_id == display_id)
            .ok_or_else(|| StoreError::not_found("therapist", display_id))
    }

    pub async fn pending_request(&self) -> StoreResult<BookingRequest> {
        self.store
            .insert_booking_request(BookingRequest {
                id: Uuid::new_v4(),
                patient_id: Some(self.patient.id),
                status: ApprovalStatus::Pending,
                booking_id: None,
                created_at: Utc::now(),
            })
            .await
    }

    pub fn state(&self) -> AppState {
        AppState::new(AppConfig::default(), self.store.clone())
    }

    pub fn state_with(&self, config: AppConfig) -> AppState {
        AppState::new(config, self.store.clone())
    }
}
