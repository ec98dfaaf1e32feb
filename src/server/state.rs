use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::notification::{
    create_stores, LogTransport, NotificationDispatcher, Stores, Transport,
};
use crate::postgres::PostgresPool;
use crate::template::TemplateService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub templates: Arc<TemplateService>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub postgres_pool: Option<Arc<PostgresPool>>,
    pub start_time: Instant,
}

impl AppState {
    /// Build state with the configured stores and the logging transport
    pub fn new(settings: Settings, postgres_pool: Option<Arc<PostgresPool>>) -> Self {
        let stores = create_stores(&settings, postgres_pool.clone());
        let transport = Arc::new(LogTransport::new(
            settings.transport.suppressed_email_domains.clone(),
        ));
        Self::with_components(settings, stores, transport, postgres_pool)
    }

    /// Build state around explicit stores and transport
    pub fn with_components(
        settings: Settings,
        stores: Stores,
        transport: Arc<dyn Transport>,
        postgres_pool: Option<Arc<PostgresPool>>,
    ) -> Self {
        let templates = Arc::new(TemplateService::new(stores.templates));
        let dispatcher = Arc::new(
            NotificationDispatcher::new(stores.notifications, templates.clone(), transport)
                .with_parallel_channels(settings.dispatch.parallel_channels),
        );

        Self {
            settings: Arc::new(settings),
            templates,
            dispatcher,
            postgres_pool,
            start_time: Instant::now(),
        }
    }
}
