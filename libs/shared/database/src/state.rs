use std::sync::Arc;
use tracing::info;

use shared_config::{AppConfig, StorageBackend};

use crate::memory::MemoryStore;
use crate::store::SchedulingStore;
use crate::supabase_store::SupabaseStore;

/// Shared handler state: configuration plus the scheduling store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SchedulingStore>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn SchedulingStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// Builds the store selected by `STORAGE_BACKEND`.
    pub fn from_config(config: AppConfig) -> Self {
        let store: Arc<dyn SchedulingStore> = match config.storage_backend {
            StorageBackend::Supabase => {
                info!("Using Supabase scheduling store at {}", config.supabase_url);
                Arc::new(SupabaseStore::new(&config))
            }
            StorageBackend::Memory => {
                info!("Using in-memory scheduling store");
                Arc::new(MemoryStore::new())
            }
        };
        Self::new(config, store)
    }
}
