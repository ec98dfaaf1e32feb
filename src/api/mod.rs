//! API layer - HTTP endpoint handlers organized by domain.

mod health;
mod metrics;
mod notification;
mod recipient;
mod routes;
mod template;

pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use notification::{notification_status, notify, refund_delivery, retry_delivery};
pub use recipient::{list_subscriptions, set_preference, upsert_subscription};
pub use routes::api_routes;
pub use template::{
    create_template, get_template, list_templates, list_variables, preview_template,
    register_variable, update_template,
};
