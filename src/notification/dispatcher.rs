use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::metrics::{CreditMetrics, DeliveryMetrics};
use crate::telemetry::attributes;
use crate::template::{
    NotificationTemplate, RenderOptions, RenderedMessage, TemplateError, TemplateService,
};

use super::backend::{NotificationStore, Reservation};
use super::eligibility::EligibilityResolver;
use super::transport::{EmailMessage, TextMessage, Transport};
use super::types::{
    Channel, Delivery, DeliveryStatus, DeliveryUpdate, Notification, NotificationKey,
    NotificationOutcome, OverallStatus, Payload, Recipient, SkipReason, SourceStatus,
    SourceType, StatusQuery,
};

/// Errors that abort a dispatcher operation as a whole
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Notification not found: {0}")]
    NotificationNotFound(Uuid),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Template(e) => e.code(),
            DispatchError::Store(e) => e.code(),
            DispatchError::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
        }
    }
}

/// One triggering event for one recipient
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    pub school_id: String,
    pub recipient: Recipient,
    pub source_type: SourceType,
    pub source_id: String,
    pub template_id: Uuid,
    #[serde(default)]
    pub payload: Payload,
}

impl NotifyRequest {
    fn key(&self) -> NotificationKey {
        NotificationKey {
            school_id: self.school_id.clone(),
            recipient_id: self.recipient.id.clone(),
            source_type: self.source_type,
            source_id: self.source_id.clone(),
        }
    }
}

/// Statistics for the notification dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// notify calls that reached the channel stage or returned early
    pub notifications: AtomicU64,
    /// notify calls aborted by rendering
    pub aborted: AtomicU64,
    pub deliveries_sent: AtomicU64,
    pub deliveries_failed: AtomicU64,
    pub deliveries_skipped: AtomicU64,
    /// Per-channel store failures that were logged and swallowed
    pub store_errors: AtomicU64,
    pub credits_refunded: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            notifications: self.notifications.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            deliveries_sent: self.deliveries_sent.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            deliveries_skipped: self.deliveries_skipped.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            credits_refunded: self.credits_refunded.load(Ordering::Relaxed),
        }
    }

    fn record(&self, status: DeliveryStatus) {
        let counter = match status {
            DeliveryStatus::Sent => &self.deliveries_sent,
            DeliveryStatus::Failed => &self.deliveries_failed,
            DeliveryStatus::Skipped => &self.deliveries_skipped,
            DeliveryStatus::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub notifications: u64,
    pub aborted: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
    pub deliveries_skipped: u64,
    pub store_errors: u64,
    pub credits_refunded: u64,
}

/// Rendered content shared by every channel of one notify call
struct Outbound {
    subject: String,
    body: String,
}

impl Outbound {
    fn new(template: &NotificationTemplate, rendered: RenderedMessage) -> Self {
        Self {
            subject: rendered.subject.unwrap_or_else(|| template.name.clone()),
            body: rendered.body,
        }
    }
}

/// Drives the per-channel delivery state machine
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    templates: Arc<TemplateService>,
    resolver: EligibilityResolver,
    transport: Arc<dyn Transport>,
    parallel: bool,
    stats: DispatcherStats,
}

impl NotificationDispatcher {
    /// Create a dispatcher that sends channels concurrently
    pub fn new(
        store: Arc<dyn NotificationStore>,
        templates: Arc<TemplateService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            resolver: EligibilityResolver::new(store.clone()),
            store,
            templates,
            transport,
            parallel: true,
            stats: DispatcherStats::default(),
        }
    }

    /// Toggle concurrent channel fan-out
    pub fn with_parallel_channels(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub fn templates(&self) -> &Arc<TemplateService> {
        &self.templates
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Record a triggering event and attempt every eligible channel.
    ///
    /// Store errors before channel work (notification upsert, eligibility
    /// reads) propagate. After that only rendering can fail the call: row
    /// writes are isolated per channel, logged and counted in `store_errors`.
    #[tracing::instrument(
        name = "dispatcher.notify",
        skip(self, request),
        fields(
            school_id = %request.school_id,
            recipient_id = %request.recipient.id,
            source_type = %request.source_type,
            source_id = %request.source_id,
            notification.id = tracing::field::Empty,
            overall = tracing::field::Empty,
            sent = tracing::field::Empty,
            failed = tracing::field::Empty,
            skipped = tracing::field::Empty
        )
    )]
    pub async fn notify(&self, request: NotifyRequest) -> Result<NotificationOutcome, DispatchError> {
        DeliveryMetrics::record_notify();

        let notification = self
            .store
            .upsert_notification(&request.key(), request.template_id, &request.payload)
            .await?;

        let eligibility = self
            .resolver
            .resolve(&request.recipient.id, request.source_type)
            .await?;

        for ineligible in &eligibility.ineligible {
            self.write(
                notification.id,
                ineligible.channel,
                DeliveryUpdate::skipped(ineligible.reason),
            )
            .await;
        }

        if eligibility.eligible.is_empty() {
            tracing::debug!(notification_id = %notification.id, "No eligible channels");
            self.stats.notifications.fetch_add(1, Ordering::Relaxed);
            return self.outcome(notification).await;
        }

        let outbound = match self
            .render_strict(
                &request.school_id,
                request.source_type,
                request.template_id,
                &request.payload,
            )
            .await
        {
            Ok(outbound) => outbound,
            Err(e) => {
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_aborted(e.code());
                tracing::warn!(
                    notification_id = %notification.id,
                    error = %e,
                    "Notify aborted before any channel was attempted"
                );
                return Err(e);
            }
        };

        self.deliver_all(&notification, &request.recipient, &eligibility.eligible, &outbound)
            .await;

        self.stats.notifications.fetch_add(1, Ordering::Relaxed);
        self.outcome(notification).await
    }

    /// Re-run a single channel of an existing notification.
    ///
    /// Eligibility is re-evaluated for the notification's recipient, the
    /// stored payload is re-rendered strictly, and contact addresses come
    /// from `recipient`. A channel that is already SENT, or PENDING with a
    /// send in flight, is returned as is so it is never sent or charged twice.
    #[tracing::instrument(
        name = "dispatcher.retry_channel",
        skip(self, recipient),
        fields(
            notification.id = %notification_id,
            channel = %channel,
            overall = tracing::field::Empty,
            sent = tracing::field::Empty,
            failed = tracing::field::Empty,
            skipped = tracing::field::Empty
        )
    )]
    pub async fn retry_channel(
        &self,
        notification_id: Uuid,
        channel: Channel,
        recipient: &Recipient,
    ) -> Result<NotificationOutcome, DispatchError> {
        let notification = self
            .store
            .get_notification(notification_id)
            .await?
            .ok_or(DispatchError::NotificationNotFound(notification_id))?;

        let current = self
            .store
            .deliveries(notification.id)
            .await?
            .into_iter()
            .find(|d| d.channel == channel);
        if let Some(delivery) = current.filter(|d| !d.status.is_retryable()) {
            tracing::info!(
                status = delivery.status.as_str(),
                "Channel already delivered or in flight, not retrying"
            );
            return self.outcome(notification).await;
        }

        if recipient.id != notification.recipient_id {
            tracing::warn!(
                expected = %notification.recipient_id,
                given = %recipient.id,
                "Retry recipient differs from notification recipient, using notification recipient"
            );
        }
        let recipient = Recipient {
            id: notification.recipient_id.clone(),
            email: recipient.email.clone(),
            phone: recipient.phone.clone(),
        };

        let eligibility = self
            .resolver
            .resolve_channels(&recipient.id, notification.source_type, &[channel])
            .await?;

        if let Some(ineligible) = eligibility.ineligible.first() {
            self.write(notification.id, channel, DeliveryUpdate::skipped(ineligible.reason))
                .await;
            return self.outcome(notification).await;
        }

        let outbound = self
            .render_strict(
                &notification.school_id,
                notification.source_type,
                notification.template_id,
                &notification.payload,
            )
            .await?;

        self.deliver_channel(&notification, &recipient, channel, &outbound)
            .await;
        self.outcome(notification).await
    }

    /// Return the credit consumed by a FAILED metered delivery.
    ///
    /// `Ok(false)` when nothing was refunded: the channel is not metered,
    /// the row is not FAILED, or it was already refunded.
    #[tracing::instrument(
        name = "dispatcher.refund_credit",
        skip(self),
        fields(notification_id = %notification_id, channel = %channel)
    )]
    pub async fn refund_credit(
        &self,
        notification_id: Uuid,
        channel: Channel,
    ) -> Result<bool, DispatchError> {
        let notification = self
            .store
            .get_notification(notification_id)
            .await?
            .ok_or(DispatchError::NotificationNotFound(notification_id))?;

        if !channel.is_metered() {
            return Ok(false);
        }

        let refunded = self
            .store
            .refund_delivery(notification.id, &notification.recipient_id, channel)
            .await?;

        if refunded {
            CreditMetrics::record_refunded(channel);
            self.stats.credits_refunded.fetch_add(1, Ordering::Relaxed);
            tracing::info!(recipient_id = %notification.recipient_id, "Credit refunded");
        }

        Ok(refunded)
    }

    /// Rollup per source id.
    ///
    /// Every requested source id is present in the result; ids with no
    /// notification report NOT_SENT. When several notifications share a
    /// source id (different recipients) their deliveries are rolled up
    /// together and each channel shows its most recently updated row.
    #[tracing::instrument(
        name = "dispatcher.get_statuses",
        skip(self, query),
        fields(school_id = %query.school_id, source_type = %query.source_type, count = query.source_ids.len())
    )]
    pub async fn get_statuses(
        &self,
        query: &StatusQuery,
    ) -> Result<BTreeMap<String, SourceStatus>, DispatchError> {
        let found = self.store.find_notifications(query).await?;

        let mut grouped: BTreeMap<String, Vec<Delivery>> = query
            .source_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        for (notification, deliveries) in found {
            grouped
                .entry(notification.source_id)
                .or_default()
                .extend(deliveries);
        }

        Ok(grouped
            .into_iter()
            .map(|(source_id, deliveries)| (source_id, summarize(&deliveries)))
            .collect())
    }

    /// Load and render a template owned by `school_id` for `source_type`.
    /// A template outside that scope is reported as not found.
    async fn render_strict(
        &self,
        school_id: &str,
        source_type: SourceType,
        template_id: Uuid,
        payload: &Payload,
    ) -> Result<Outbound, DispatchError> {
        let template = self.templates.get(template_id).await?;
        if template.school_id != school_id || template.source_type != source_type {
            return Err(TemplateError::NotFound(template_id).into());
        }
        let rendered = self
            .templates
            .render(&template, payload, RenderOptions::strict())
            .await?;
        Ok(Outbound::new(&template, rendered))
    }

    async fn deliver_all(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        channels: &[Channel],
        outbound: &Outbound,
    ) {
        if self.parallel {
            join_all(
                channels
                    .iter()
                    .map(|&channel| self.deliver_channel(notification, recipient, channel, outbound)),
            )
            .await;
        } else {
            for &channel in channels {
                self.deliver_channel(notification, recipient, channel, outbound)
                    .await;
            }
        }
    }

    /// Steps 5a-5e for one channel. Never fails: problems end up in the
    /// delivery row or, for store failures, in the log.
    #[tracing::instrument(
        name = "dispatcher.deliver_channel",
        skip(self, notification, recipient, outbound),
        fields(notification_id = %notification.id, channel = %channel)
    )]
    async fn deliver_channel(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        channel: Channel,
        outbound: &Outbound,
    ) {
        let Some(address) = recipient.address_for(channel) else {
            self.write(notification.id, channel, DeliveryUpdate::skipped(SkipReason::no_contact(channel)))
                .await;
            return;
        };

        let reservation = match self
            .store
            .reserve_delivery(notification.id, &recipient.id, channel)
            .await
        {
            Ok(reservation) => reservation,
            Err(e) => {
                self.store_failed(notification.id, channel, &e);
                return;
            }
        };

        match reservation {
            Reservation::Reserved(_) => {
                if channel.is_metered() {
                    CreditMetrics::record_reserved(channel);
                }
            }
            Reservation::RaceLost(delivery) => {
                CreditMetrics::record_race_lost(channel);
                tracing::info!(recipient_id = %recipient.id, "Credit reservation lost the race");
                self.recorded(&delivery);
                return;
            }
        }

        let update = self.send(channel, address, outbound).await;
        self.write(notification.id, channel, update).await;
    }

    async fn send(&self, channel: Channel, address: &str, outbound: &Outbound) -> DeliveryUpdate {
        let started = Instant::now();
        let result = match channel {
            Channel::Email => {
                self.transport
                    .send_email(&EmailMessage {
                        to_email: address.to_string(),
                        subject: outbound.subject.clone(),
                        body_text: outbound.body.clone(),
                    })
                    .await
            }
            Channel::Sms => {
                let message = TextMessage {
                    to_phone: address.to_string(),
                    body_text: outbound.body.clone(),
                };
                self.transport.send_sms(&message).await.map(Some)
            }
            Channel::Whatsapp => {
                let message = TextMessage {
                    to_phone: address.to_string(),
                    body_text: outbound.body.clone(),
                };
                self.transport.send_whatsapp(&message).await.map(Some)
            }
        };
        DeliveryMetrics::record_transport_latency(channel, started.elapsed().as_secs_f64());

        match result {
            Ok(Some(receipt)) => DeliveryUpdate::Sent {
                provider: receipt.provider,
                provider_msg_id: receipt.provider_msg_id,
                sent_at: Utc::now(),
            },
            Ok(None) => DeliveryUpdate::Skipped {
                reason: SkipReason::Suppressed.as_str().to_string(),
                attempted: true,
            },
            Err(e) => {
                tracing::warn!(channel = %channel, code = e.code(), error = %e, "Transport failed");
                DeliveryUpdate::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn write(&self, notification_id: Uuid, channel: Channel, update: DeliveryUpdate) {
        match self
            .store
            .upsert_delivery(notification_id, channel, &update)
            .await
        {
            Ok(delivery) => self.recorded(&delivery),
            Err(e) => self.store_failed(notification_id, channel, &e),
        }
    }

    fn recorded(&self, delivery: &Delivery) {
        DeliveryMetrics::record_status(delivery.channel, delivery.status);
        self.stats.record(delivery.status);
        tracing::debug!(
            channel = %delivery.channel,
            status = delivery.status.as_str(),
            skip_reason = ?delivery.skip_reason,
            attempt_count = delivery.attempt_count,
            "Delivery recorded"
        );
    }

    fn store_failed(&self, notification_id: Uuid, channel: Channel, error: &StoreError) {
        self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            notification_id = %notification_id,
            channel = %channel,
            error = %error,
            "Failed to persist delivery state"
        );
    }

    async fn outcome(&self, notification: Notification) -> Result<NotificationOutcome, DispatchError> {
        let deliveries = self.store.deliveries(notification.id).await?;
        let outcome = NotificationOutcome::new(notification, deliveries);
        attributes::record_outcome(&tracing::Span::current(), &outcome);
        Ok(outcome)
    }
}

fn summarize(deliveries: &[Delivery]) -> SourceStatus {
    let mut latest: BTreeMap<Channel, &Delivery> = BTreeMap::new();
    for delivery in deliveries {
        let newer = latest
            .get(&delivery.channel)
            .map_or(true, |current| delivery.updated_at > current.updated_at);
        if newer {
            latest.insert(delivery.channel, delivery);
        }
    }

    SourceStatus {
        overall: OverallStatus::rollup(deliveries.iter().map(|d| d.status)),
        channels: latest
            .into_iter()
            .map(|(channel, delivery)| (channel, delivery.status))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::notification::transport::{ProviderReceipt, TransportError};
    use crate::notification::{MemoryNotificationStore, Subscription, SubscriptionStatus};
    use crate::template::{
        CreateTemplateRequest, MemoryTemplateCatalog, TemplateCatalog, TemplateVariable,
    };

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<Channel>>,
        fail_email: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_email(&self, _: &EmailMessage) -> Result<Option<ProviderReceipt>, TransportError> {
            self.calls.lock().unwrap().push(Channel::Email);
            if self.fail_email {
                return Err(TransportError::new("smtp down"));
            }
            Ok(Some(ProviderReceipt {
                provider: "test".to_string(),
                provider_msg_id: "e-1".to_string(),
            }))
        }

        async fn send_sms(&self, _: &TextMessage) -> Result<ProviderReceipt, TransportError> {
            self.calls.lock().unwrap().push(Channel::Sms);
            Ok(ProviderReceipt {
                provider: "test".to_string(),
                provider_msg_id: "s-1".to_string(),
            })
        }

        async fn send_whatsapp(&self, _: &TextMessage) -> Result<ProviderReceipt, TransportError> {
            self.calls.lock().unwrap().push(Channel::Whatsapp);
            Ok(ProviderReceipt {
                provider: "test".to_string(),
                provider_msg_id: "w-1".to_string(),
            })
        }
    }

    async fn setup(transport: Arc<RecordingTransport>) -> (NotificationDispatcher, Arc<MemoryNotificationStore>, Uuid) {
        let store = Arc::new(MemoryNotificationStore::new());
        let catalog = Arc::new(MemoryTemplateCatalog::new());
        catalog
            .register_variable(TemplateVariable {
                school_id: "s1".to_string(),
                source_type: SourceType::Grade,
                key: "studentName".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let templates = Arc::new(TemplateService::new(catalog));
        let template = templates
            .create(CreateTemplateRequest {
                school_id: "s1".to_string(),
                source_type: SourceType::Grade,
                channel: Channel::Email,
                locale: None,
                name: "Grade posted".to_string(),
                subject_template: None,
                body_template: "Grade for {{studentName}}".to_string(),
                status: None,
            })
            .await
            .unwrap();

        for channel in [Channel::Email, Channel::Sms] {
            store
                .set_preference("r1", SourceType::Grade, channel, true)
                .await
                .unwrap();
        }
        store
            .upsert_subscription(&Subscription {
                entity_id: "r1".to_string(),
                channel: Channel::Email,
                status: SubscriptionStatus::Active,
                balance: None,
            })
            .await
            .unwrap();
        store
            .upsert_subscription(&Subscription {
                entity_id: "r1".to_string(),
                channel: Channel::Sms,
                status: SubscriptionStatus::Active,
                balance: Some(1),
            })
            .await
            .unwrap();

        let dispatcher = NotificationDispatcher::new(store.clone(), templates, transport)
            .with_parallel_channels(false);
        (dispatcher, store, template.id)
    }

    fn request(template_id: Uuid) -> NotifyRequest {
        let mut payload = Payload::new();
        payload.insert("studentName".to_string(), "Ana".into());
        NotifyRequest {
            school_id: "s1".to_string(),
            recipient: Recipient {
                id: "r1".to_string(),
                email: Some("parent@school.org".to_string()),
                phone: Some("+15550001".to_string()),
            },
            source_type: SourceType::Grade,
            source_id: "g-1".to_string(),
            template_id,
            payload,
        }
    }

    #[tokio::test]
    async fn test_notify_sends_eligible_and_skips_rest() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, _, template_id) = setup(transport.clone()).await;

        let outcome = dispatcher.notify(request(template_id)).await.unwrap();

        assert_eq!(outcome.deliveries.len(), 3);
        assert_eq!(outcome.delivery(Channel::Email).unwrap().status, DeliveryStatus::Sent);
        assert_eq!(outcome.delivery(Channel::Sms).unwrap().status, DeliveryStatus::Sent);
        let whatsapp = outcome.delivery(Channel::Whatsapp).unwrap();
        assert_eq!(whatsapp.status, DeliveryStatus::Skipped);
        assert_eq!(whatsapp.skip_reason.as_deref(), Some("Not preferred"));
        assert_eq!(outcome.overall, OverallStatus::Partial);
        assert_eq!(transport.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_template_from_other_school_is_not_found() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, _, template_id) = setup(transport.clone()).await;

        let mut req = request(template_id);
        req.school_id = "s2".to_string();
        let err = dispatcher.notify(req).await.unwrap_err();

        assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_only_failed_metered_once() {
        let transport = Arc::new(RecordingTransport {
            fail_email: true,
            ..Default::default()
        });
        let (dispatcher, store, template_id) = setup(transport).await;

        let outcome = dispatcher.notify(request(template_id)).await.unwrap();
        let id = outcome.notification.id;
        assert_eq!(outcome.delivery(Channel::Email).unwrap().status, DeliveryStatus::Failed);

        // email is not metered, sms was sent
        assert!(!dispatcher.refund_credit(id, Channel::Email).await.unwrap());
        assert!(!dispatcher.refund_credit(id, Channel::Sms).await.unwrap());

        store
            .upsert_delivery(id, Channel::Sms, &DeliveryUpdate::Failed { error: "x".to_string() })
            .await
            .unwrap();
        assert!(dispatcher.refund_credit(id, Channel::Sms).await.unwrap());
        assert!(!dispatcher.refund_credit(id, Channel::Sms).await.unwrap());

        let subs = store.subscriptions("r1").await.unwrap();
        let sms = subs.iter().find(|s| s.channel == Channel::Sms).unwrap();
        assert_eq!(sms.balance, Some(1));
        assert_eq!(dispatcher.stats().credits_refunded, 1);
    }

    #[tokio::test]
    async fn test_refund_unknown_notification() {
        let (dispatcher, _, _) = setup(Arc::new(RecordingTransport::default())).await;
        let err = dispatcher
            .refund_credit(Uuid::new_v4(), Channel::Sms)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotificationNotFound(_)));
    }

    #[test]
    fn test_summarize_prefers_latest_row_per_channel() {
        let nid = Uuid::new_v4();
        let mut older = Delivery::new(nid, Channel::Email);
        older.apply(&DeliveryUpdate::Failed { error: "x".to_string() });
        older.updated_at = Utc::now() - chrono::Duration::seconds(10);
        let mut newer = Delivery::new(Uuid::new_v4(), Channel::Email);
        newer.apply(&DeliveryUpdate::Sent {
            provider: "p".to_string(),
            provider_msg_id: "m".to_string(),
            sent_at: Utc::now(),
        });

        let status = summarize(&[older, newer]);
        assert_eq!(status.overall, OverallStatus::Partial);
        assert_eq!(status.channels.get(&Channel::Email), Some(&DeliveryStatus::Sent));
    }
}
