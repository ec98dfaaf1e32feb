//! Backend trait for notification storage.
//!
//! This module defines the abstraction layer over the notification aggregate
//! (notification + per-channel delivery rows) and the recipient reference
//! data the eligibility resolver reads (preferences, subscriptions).

use std::collections::BTreeSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;

use super::types::{
    Channel, Delivery, DeliveryUpdate, Notification, NotificationKey, Payload, SourceType,
    StatusQuery, Subscription,
};

/// Outcome of the atomic credit reservation + PENDING mark
#[derive(Debug, Clone)]
pub enum Reservation {
    /// Credit reserved (or not needed) and the row is PENDING
    Reserved(Delivery),
    /// Conditional decrement affected no rows; the row is SKIPPED
    RaceLost(Delivery),
}

/// Backend trait for notification storage.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared
/// across concurrent `notify` calls.
///
/// # Atomicity
///
/// `reserve_delivery` must perform the conditional balance decrement and the
/// delivery upsert as one unit, and `refund_delivery` must flag the row and
/// credit the balance as one unit.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Backend type identifier
    fn backend_type(&self) -> &'static str;

    /// Insert the notification for `key`, or overwrite template and payload
    /// of the existing one.
    async fn upsert_notification(
        &self,
        key: &NotificationKey,
        template_id: Uuid,
        payload: &Payload,
    ) -> Result<Notification, StoreError>;

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError>;

    /// All delivery rows of a notification
    async fn deliveries(&self, notification_id: Uuid) -> Result<Vec<Delivery>, StoreError>;

    /// Insert or overwrite the (notification, channel) delivery row.
    async fn upsert_delivery(
        &self,
        notification_id: Uuid,
        channel: Channel,
        update: &DeliveryUpdate,
    ) -> Result<Delivery, StoreError>;

    /// For metered channels, decrement `entity_id`'s balance if it is
    /// positive; then mark the delivery PENDING, or SKIPPED when the
    /// decrement lost the race. Non-metered channels go straight to PENDING.
    async fn reserve_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<Reservation, StoreError>;

    /// Return the credit consumed by a FAILED metered delivery.
    ///
    /// Returns `false` when the row is not FAILED, was already refunded,
    /// or the entity has no subscription to credit.
    async fn refund_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<bool, StoreError>;

    /// Channels `entity_id` opted into for `source_type`
    async fn preferred_channels(
        &self,
        entity_id: &str,
        source_type: SourceType,
    ) -> Result<BTreeSet<Channel>, StoreError>;

    async fn subscriptions(&self, entity_id: &str) -> Result<Vec<Subscription>, StoreError>;

    async fn set_preference(
        &self,
        entity_id: &str,
        source_type: SourceType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError>;

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Notifications matching a status query, each with its delivery rows
    async fn find_notifications(
        &self,
        query: &StatusQuery,
    ) -> Result<Vec<(Notification, Vec<Delivery>)>, StoreError>;
}
