//! Store backend factory

use std::sync::Arc;

use crate::config::Settings;
use crate::postgres::PostgresPool;
use crate::template::{MemoryTemplateCatalog, PostgresTemplateCatalog, TemplateCatalog};

use super::backend::NotificationStore;
use super::memory_backend::MemoryNotificationStore;
use super::postgres_backend::PostgresNotificationStore;

/// Notification store and template catalog sharing one backend
pub struct Stores {
    pub notifications: Arc<dyn NotificationStore>,
    pub templates: Arc<dyn TemplateCatalog>,
}

/// Create the store backends based on configuration.
///
/// - `"postgres"`: PostgreSQL-backed stores if a pool is provided
/// - `"memory"` (default): DashMap-backed stores
///
/// # Example
///
/// ```rust,ignore
/// let stores = create_stores(&settings, Some(pg_pool.clone()));
/// ```
pub fn create_stores(settings: &Settings, postgres_pool: Option<Arc<PostgresPool>>) -> Stores {
    match settings.store.backend.to_ascii_lowercase().as_str() {
        "postgres" => {
            if let Some(pool) = postgres_pool {
                tracing::info!(backend = "postgres", "Creating PostgreSQL notification stores");
                return Stores {
                    notifications: Arc::new(PostgresNotificationStore::new(pool.pool().clone())),
                    templates: Arc::new(PostgresTemplateCatalog::new(pool.pool().clone())),
                };
            }
            tracing::warn!(
                "PostgreSQL store backend requested but no pool available, falling back to memory"
            );
        }
        "memory" => {}
        other => {
            tracing::warn!(backend = %other, "Unknown store backend, falling back to memory");
        }
    }

    tracing::info!(backend = "memory", "Creating in-memory notification stores");
    Stores {
        notifications: Arc::new(MemoryNotificationStore::new()),
        templates: Arc::new(MemoryTemplateCatalog::new()),
    }
}
