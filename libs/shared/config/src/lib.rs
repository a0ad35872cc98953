use std::env;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Supabase,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub storage_backend: StorageBackend,
    pub server_port: u16,
    pub availability_window_days: u32,
    pub availability_max_range_days: u32,
    pub clinic_utc_offset_minutes: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            storage_backend: StorageBackend::Memory,
            server_port: 3000,
            availability_window_days: 14,
            availability_max_range_days: 93,
            clinic_utc_offset_minutes: 330,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });
        let supabase_service_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                String::new()
            });

        let storage_backend = match env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("supabase") => StorageBackend::Supabase,
            Some(other) => {
                warn!("Unknown STORAGE_BACKEND '{}', picking from Supabase settings", other);
                Self::backend_for(&supabase_url, &supabase_service_key)
            }
            None => Self::backend_for(&supabase_url, &supabase_service_key),
        };

        let config = Self {
            supabase_url,
            supabase_service_key,
            storage_backend,
            server_port: parse_or("SERVER_PORT", defaults.server_port),
            availability_window_days: parse_or("AVAILABILITY_WINDOW_DAYS", defaults.availability_window_days),
            availability_max_range_days: parse_or("AVAILABILITY_MAX_RANGE_DAYS", defaults.availability_max_range_days),
            clinic_utc_offset_minutes: parse_or("CLINIC_TIMEZONE_OFFSET_MINUTES", defaults.clinic_utc_offset_minutes),
        };

        if config.storage_backend == StorageBackend::Supabase && !config.is_configured() {
            warn!("Supabase backend selected but not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_key.is_empty()
    }

    fn backend_for(url: &str, key: &str) -> StorageBackend {
        if url.is_empty() || key.is_empty() {
            warn!("Supabase not configured, falling back to in-memory storage");
            StorageBackend::Memory
        } else {
            StorageBackend::Supabase
        }
    }
}

fn parse_or<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_memory_backend() {
        let config = AppConfig::default();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.availability_window_days, 14);
        assert!(!config.is_configured());
    }

    #[test]
    fn test_backend_requires_both_url_and_key() {
        assert_eq!(AppConfig::backend_for("", "key"), StorageBackend::Memory);
        assert_eq!(AppConfig::backend_for("http://db", ""), StorageBackend::Memory);
        assert_eq!(AppConfig::backend_for("http://db", "key"), StorageBackend::Supabase);
    }
}
