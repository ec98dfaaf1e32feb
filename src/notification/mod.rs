//! Notification dispatch: records, eligibility, delivery state machine.
//!
//! # Backend Architecture
//!
//! Persistence sits behind the `NotificationStore` trait:
//!
//! - `MemoryNotificationStore`: In-memory storage using DashMap (default)
//! - `PostgresNotificationStore`: PostgreSQL with unique composite keys and
//!   transactional credit reservation
//!
//! Use `create_stores()` to create the configured backend together with the
//! matching template catalog.
//!
//! # Delivery lifecycle
//!
//! Each (notification, channel) pair owns one delivery row:
//! `ABSENT -> PENDING -> SENT | FAILED`, or `ABSENT -> SKIPPED`.
//! Re-triggering overwrites the row in place.

mod backend;
mod dispatcher;
mod eligibility;
mod factory;
mod memory_backend;
mod postgres_backend;
mod transport;
mod types;

pub use backend::{NotificationStore, Reservation};
pub use dispatcher::{
    DispatchError, DispatcherStats, DispatcherStatsSnapshot, NotificationDispatcher, NotifyRequest,
};
pub use eligibility::{evaluate_channel, Eligibility, EligibilityResolver, IneligibleChannel};
pub use factory::{create_stores, Stores};
pub use memory_backend::MemoryNotificationStore;
pub use postgres_backend::PostgresNotificationStore;
pub use transport::{
    EmailMessage, LogTransport, ProviderReceipt, TextMessage, Transport, TransportError,
};
pub use types::{
    Channel, Delivery, DeliveryColumns, DeliveryStatus, DeliveryUpdate, Notification,
    NotificationKey, NotificationOutcome, OverallStatus, ParseEnumError, Payload, PayloadValue,
    Recipient, SkipReason, SourceStatus, SourceType, StatusQuery, Subscription,
    SubscriptionStatus,
};
