//! In-memory notification backend using DashMap.
//!
//! State is lost on restart. Lock order is always subscriptions before
//! deliveries, and keys before notifications.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreError;

use super::backend::{NotificationStore, Reservation};
use super::types::{
    Channel, Delivery, DeliveryStatus, DeliveryUpdate, Notification, NotificationKey, Payload,
    SkipReason, SourceType, StatusQuery, Subscription,
};

/// In-memory notification backend.
#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: DashMap<Uuid, Notification>,
    keys: DashMap<NotificationKey, Uuid>,
    deliveries: DashMap<(Uuid, Channel), Delivery>,
    subscriptions: DashMap<(String, Channel), Subscription>,
    preferences: DashMap<(String, SourceType), BTreeSet<Channel>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notification rows (test and stats helper)
    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    /// Number of delivery rows (test and stats helper)
    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }

    fn apply_delivery(&self, notification_id: Uuid, channel: Channel, update: &DeliveryUpdate) -> Delivery {
        let mut row = self
            .deliveries
            .entry((notification_id, channel))
            .or_insert_with(|| Delivery::new(notification_id, channel));
        row.apply(update);
        row.clone()
    }

    fn collect_deliveries(&self, notification_id: Uuid) -> Vec<Delivery> {
        Channel::ALL
            .iter()
            .filter_map(|channel| {
                self.deliveries
                    .get(&(notification_id, *channel))
                    .map(|d| d.clone())
            })
            .collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn upsert_notification(
        &self,
        key: &NotificationKey,
        template_id: Uuid,
        payload: &Payload,
    ) -> Result<Notification, StoreError> {
        match self.keys.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let id = *entry.get();
                let mut existing = self
                    .notifications
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::Corrupt(format!("dangling notification key {}", id)))?;
                existing.template_id = template_id;
                existing.payload = payload.clone();
                existing.updated_at = Utc::now();
                Ok(existing.clone())
            }
            Entry::Vacant(entry) => {
                let now = Utc::now();
                let notification = Notification {
                    id: Uuid::new_v4(),
                    school_id: key.school_id.clone(),
                    recipient_id: key.recipient_id.clone(),
                    source_type: key.source_type,
                    source_id: key.source_id.clone(),
                    template_id,
                    payload: payload.clone(),
                    created_at: now,
                    updated_at: now,
                };
                self.notifications
                    .insert(notification.id, notification.clone());
                entry.insert(notification.id);
                Ok(notification)
            }
        }
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self.notifications.get(&id).map(|n| n.clone()))
    }

    async fn deliveries(&self, notification_id: Uuid) -> Result<Vec<Delivery>, StoreError> {
        Ok(self.collect_deliveries(notification_id))
    }

    async fn upsert_delivery(
        &self,
        notification_id: Uuid,
        channel: Channel,
        update: &DeliveryUpdate,
    ) -> Result<Delivery, StoreError> {
        Ok(self.apply_delivery(notification_id, channel, update))
    }

    async fn reserve_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<Reservation, StoreError> {
        if !channel.is_metered() {
            let row = self.apply_delivery(notification_id, channel, &DeliveryUpdate::Pending);
            return Ok(Reservation::Reserved(row));
        }

        // Hold the subscription shard lock across the delivery write so the
        // decrement and the PENDING row land together.
        let mut subscription = self.subscriptions.get_mut(&(entity_id.to_string(), channel));
        let reserved = match subscription.as_deref_mut() {
            Some(sub) => match sub.balance {
                Some(balance) if balance > 0 => {
                    sub.balance = Some(balance - 1);
                    true
                }
                _ => false,
            },
            None => false,
        };

        let reservation = if reserved {
            Reservation::Reserved(self.apply_delivery(
                notification_id,
                channel,
                &DeliveryUpdate::Pending,
            ))
        } else {
            Reservation::RaceLost(self.apply_delivery(
                notification_id,
                channel,
                &DeliveryUpdate::skipped(SkipReason::InsufficientCreditRace),
            ))
        };
        drop(subscription);

        Ok(reservation)
    }

    async fn refund_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<bool, StoreError> {
        if !channel.is_metered() {
            return Ok(false);
        }

        let Some(mut subscription) = self.subscriptions.get_mut(&(entity_id.to_string(), channel))
        else {
            return Ok(false);
        };
        let Some(mut delivery) = self.deliveries.get_mut(&(notification_id, channel)) else {
            return Ok(false);
        };

        if delivery.status != DeliveryStatus::Failed || delivery.credit_refunded {
            return Ok(false);
        }

        delivery.credit_refunded = true;
        delivery.updated_at = Utc::now();
        subscription.balance = Some(subscription.balance.unwrap_or(0) + 1);
        Ok(true)
    }

    async fn preferred_channels(
        &self,
        entity_id: &str,
        source_type: SourceType,
    ) -> Result<BTreeSet<Channel>, StoreError> {
        Ok(self
            .preferences
            .get(&(entity_id.to_string(), source_type))
            .map(|p| p.clone())
            .unwrap_or_default())
    }

    async fn subscriptions(&self, entity_id: &str) -> Result<Vec<Subscription>, StoreError> {
        Ok(Channel::ALL
            .iter()
            .filter_map(|channel| {
                self.subscriptions
                    .get(&(entity_id.to_string(), *channel))
                    .map(|s| s.clone())
            })
            .collect())
    }

    async fn set_preference(
        &self,
        entity_id: &str,
        source_type: SourceType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut channels = self
            .preferences
            .entry((entity_id.to_string(), source_type))
            .or_default();
        if enabled {
            channels.insert(channel);
        } else {
            channels.remove(&channel);
        }
        Ok(())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        if subscription.balance.is_some_and(|b| b < 0) {
            return Err(StoreError::Conflict("balance must not be negative".to_string()));
        }
        self.subscriptions.insert(
            (subscription.entity_id.clone(), subscription.channel),
            subscription.clone(),
        );
        Ok(())
    }

    async fn find_notifications(
        &self,
        query: &StatusQuery,
    ) -> Result<Vec<(Notification, Vec<Delivery>)>, StoreError> {
        let matches: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.school_id == query.school_id && n.source_type == query.source_type)
            .filter(|n| query.source_ids.contains(&n.source_id))
            .filter(|n| {
                query
                    .recipient_id
                    .as_ref()
                    .map_or(true, |r| &n.recipient_id == r)
            })
            .map(|n| n.value().clone())
            .collect();

        Ok(matches
            .into_iter()
            .map(|n| {
                let deliveries = self.collect_deliveries(n.id);
                (n, deliveries)
            })
            .collect())
    }
}
