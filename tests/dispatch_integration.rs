//! End-to-end dispatcher tests
//!
//! These tests drive `NotificationDispatcher` over the in-memory stores with
//! a scripted transport, so no database or provider is needed.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use school_notification_engine::error::StoreError;
use school_notification_engine::notification::{
    Channel, Delivery, DeliveryStatus, DeliveryUpdate, EmailMessage, MemoryNotificationStore,
    Notification, NotificationDispatcher, NotificationKey, NotificationStore, NotifyRequest,
    OverallStatus, Payload, ProviderReceipt, Recipient, Reservation, SourceType, StatusQuery,
    Subscription, SubscriptionStatus, TextMessage, Transport, TransportError,
};
use school_notification_engine::template::{
    CreateTemplateRequest, MemoryTemplateCatalog, TemplateCatalog, TemplateService,
    TemplateVariable,
};

const SCHOOL: &str = "school-1";
const RECIPIENT: &str = "guardian-1";

/// Transport whose behaviour per channel is set by the test
#[derive(Default)]
struct ScriptedTransport {
    sent: Mutex<Vec<(Channel, String)>>,
    failing: Mutex<HashSet<Channel>>,
    suppress_email: AtomicBool,
}

impl ScriptedTransport {
    fn fail(&self, channel: Channel) {
        self.failing.lock().unwrap().insert(channel);
    }

    fn recover(&self, channel: Channel) {
        self.failing.lock().unwrap().remove(&channel);
    }

    fn calls(&self) -> Vec<(Channel, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn attempt(&self, channel: Channel, body: &str) -> Result<ProviderReceipt, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((channel, body.to_string()));
        if self.failing.lock().unwrap().contains(&channel) {
            return Err(TransportError::new(format!("{} provider unavailable", channel)));
        }
        Ok(ProviderReceipt {
            provider: "scripted".to_string(),
            provider_msg_id: format!("{}-{}", channel, sent.len()),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<Option<ProviderReceipt>, TransportError> {
        let receipt = self.attempt(Channel::Email, &message.body_text)?;
        if self.suppress_email.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(receipt))
    }

    async fn send_sms(&self, message: &TextMessage) -> Result<ProviderReceipt, TransportError> {
        self.attempt(Channel::Sms, &message.body_text)
    }

    async fn send_whatsapp(&self, message: &TextMessage) -> Result<ProviderReceipt, TransportError> {
        self.attempt(Channel::Whatsapp, &message.body_text)
    }
}

struct TestEnv {
    dispatcher: NotificationDispatcher,
    store: Arc<MemoryNotificationStore>,
    transport: Arc<ScriptedTransport>,
    template_id: Uuid,
}

async fn create_template(templates: &TemplateService, body: &str) -> Uuid {
    templates
        .create(CreateTemplateRequest {
            school_id: SCHOOL.to_string(),
            source_type: SourceType::Transaction,
            channel: Channel::Email,
            locale: None,
            name: "Payment received".to_string(),
            subject_template: Some("Receipt for {{studentName}}".to_string()),
            body_template: body.to_string(),
            status: None,
        })
        .await
        .unwrap()
        .id
}

async fn build_env(parallel: bool) -> TestEnv {
    let store = Arc::new(MemoryNotificationStore::new());
    let catalog = Arc::new(MemoryTemplateCatalog::new());
    for key in ["studentName", "amount"] {
        catalog
            .register_variable(TemplateVariable {
                school_id: SCHOOL.to_string(),
                source_type: SourceType::Transaction,
                key: key.to_string(),
                description: None,
            })
            .await
            .unwrap();
    }

    let templates = Arc::new(TemplateService::new(catalog));
    let template_id = create_template(&templates, "Hi, {{studentName}} paid {{amount}}").await;

    let transport = Arc::new(ScriptedTransport::default());
    let dispatcher = NotificationDispatcher::new(store.clone(), templates, transport.clone())
        .with_parallel_channels(parallel);

    TestEnv {
        dispatcher,
        store,
        transport,
        template_id,
    }
}

async fn opt_in(store: &dyn NotificationStore, channel: Channel, balance: Option<i64>) {
    store
        .set_preference(RECIPIENT, SourceType::Transaction, channel, true)
        .await
        .unwrap();
    store
        .upsert_subscription(&Subscription {
            entity_id: RECIPIENT.to_string(),
            channel,
            status: SubscriptionStatus::Active,
            balance,
        })
        .await
        .unwrap();
}

async fn balance(store: &dyn NotificationStore, channel: Channel) -> Option<i64> {
    store
        .subscriptions(RECIPIENT)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.channel == channel)
        .and_then(|s| s.balance)
}

fn payload() -> Payload {
    serde_json::from_value(json!({ "studentName": "Ana", "amount": 120.5 })).unwrap()
}

fn recipient() -> Recipient {
    Recipient {
        id: RECIPIENT.to_string(),
        email: Some("guardian@school.org".to_string()),
        phone: Some("+15550100".to_string()),
    }
}

fn request(env: &TestEnv, source_id: &str) -> NotifyRequest {
    NotifyRequest {
        school_id: SCHOOL.to_string(),
        recipient: recipient(),
        source_type: SourceType::Transaction,
        source_id: source_id.to_string(),
        template_id: env.template_id,
        payload: payload(),
    }
}

#[tokio::test]
async fn test_notify_renders_and_sends_every_eligible_channel() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    opt_in(&*env.store, Channel::Sms, Some(5)).await;

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    assert_eq!(outcome.overall, OverallStatus::Partial);
    let email = outcome.delivery(Channel::Email).unwrap();
    assert_eq!(email.status, DeliveryStatus::Sent);
    assert_eq!(email.provider.as_deref(), Some("scripted"));
    assert!(email.sent_at.is_some());
    assert_eq!(email.attempt_count, 1);
    assert_eq!(outcome.delivery(Channel::Sms).unwrap().status, DeliveryStatus::Sent);
    assert_eq!(outcome.delivery(Channel::Whatsapp).unwrap().status, DeliveryStatus::Skipped);

    let calls = env.transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(_, body)| body == "Hi, Ana paid 120.5"));
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(4));
}

#[tokio::test]
async fn test_all_channels_sent_rolls_up_to_sent() {
    let env = build_env(false).await;
    for channel in Channel::ALL {
        let credit = channel.is_metered().then_some(2);
        opt_in(&*env.store, channel, credit).await;
    }

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    assert_eq!(outcome.overall, OverallStatus::Sent);
    assert_eq!(outcome.deliveries.len(), 3);
}

#[tokio::test]
async fn test_preference_gate_reported_before_subscription() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    for channel in [Channel::Sms, Channel::Whatsapp] {
        let delivery = outcome.delivery(channel).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Skipped);
        assert_eq!(delivery.skip_reason.as_deref(), Some("Not preferred"));
        assert_eq!(delivery.attempt_count, 0);
    }
}

#[tokio::test]
async fn test_zero_balance_skips_without_send() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Sms, Some(0)).await;

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    let sms = outcome.delivery(Channel::Sms).unwrap();
    assert_eq!(sms.status, DeliveryStatus::Skipped);
    assert_eq!(sms.skip_reason.as_deref(), Some("Insufficient credit"));
    assert!(env.transport.calls().is_empty());
    assert_eq!(outcome.overall, OverallStatus::NotSent);
}

#[tokio::test]
async fn test_missing_balance_record_is_distinct_reason() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Whatsapp, None).await;

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    assert_eq!(
        outcome.delivery(Channel::Whatsapp).unwrap().skip_reason.as_deref(),
        Some("No balance record")
    );
}

#[tokio::test]
async fn test_zero_eligible_channels_returns_without_rendering() {
    let env = build_env(true).await;

    // payload would fail strict rendering; nothing is eligible so it never renders
    let mut req = request(&env, "txn-1");
    req.payload = Payload::new();
    let outcome = env.dispatcher.notify(req).await.unwrap();

    assert_eq!(outcome.deliveries.len(), 3);
    assert!(outcome
        .deliveries
        .iter()
        .all(|d| d.status == DeliveryStatus::Skipped));
    assert_eq!(outcome.overall, OverallStatus::NotSent);
}

#[tokio::test]
async fn test_notify_twice_keeps_one_row_per_channel() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;

    let first = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    let mut second_req = request(&env, "txn-1");
    second_req
        .payload
        .insert("amount".to_string(), "99".into());
    let second = env.dispatcher.notify(second_req).await.unwrap();

    assert_eq!(first.notification.id, second.notification.id);
    assert_eq!(env.store.notification_count(), 1);
    assert_eq!(env.store.delivery_count(), 3);

    let email = second.delivery(Channel::Email).unwrap();
    assert_eq!(email.attempt_count, 2);
    assert_eq!(email.id, first.delivery(Channel::Email).unwrap().id);
    assert_eq!(
        second.notification.payload.get("amount").and_then(|v| v.render()),
        Some("99".to_string())
    );
    assert_eq!(env.transport.calls()[1].1, "Hi, Ana paid 99");
}

#[tokio::test]
async fn test_transport_failure_is_isolated_per_channel() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    opt_in(&*env.store, Channel::Sms, Some(3)).await;
    env.transport.fail(Channel::Email);

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    let email = outcome.delivery(Channel::Email).unwrap();
    assert_eq!(email.status, DeliveryStatus::Failed);
    assert!(email.error.as_deref().unwrap().contains("provider unavailable"));
    assert_eq!(email.attempt_count, 1);

    let sms = outcome.delivery(Channel::Sms).unwrap();
    assert_eq!(sms.status, DeliveryStatus::Sent);
    assert!(sms.provider_msg_id.is_some());

    assert_eq!(outcome.overall, OverallStatus::Partial);
}

#[tokio::test]
async fn test_failed_metered_send_keeps_credit_until_refund() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Sms, Some(2)).await;
    env.transport.fail(Channel::Sms);

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();
    assert_eq!(outcome.overall, OverallStatus::Failed);
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(1));

    let id = outcome.notification.id;
    assert!(env.dispatcher.refund_credit(id, Channel::Sms).await.unwrap());
    assert!(!env.dispatcher.refund_credit(id, Channel::Sms).await.unwrap());
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(2));

    // a fresh reservation makes the row refundable again
    env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(1));
    assert!(env.dispatcher.refund_credit(id, Channel::Sms).await.unwrap());
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(2));
}

#[tokio::test]
async fn test_missing_contact_skips_without_credit() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    opt_in(&*env.store, Channel::Sms, Some(1)).await;

    let mut req = request(&env, "txn-1");
    req.recipient.email = None;
    req.recipient.phone = Some("   ".to_string());
    let outcome = env.dispatcher.notify(req).await.unwrap();

    let email = outcome.delivery(Channel::Email).unwrap();
    assert_eq!(email.status, DeliveryStatus::Skipped);
    assert_eq!(email.skip_reason.as_deref(), Some("Recipient has no email"));
    assert_eq!(
        outcome.delivery(Channel::Sms).unwrap().skip_reason.as_deref(),
        Some("Recipient has no phone")
    );
    assert!(env.transport.calls().is_empty());
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(1));
}

#[tokio::test]
async fn test_missing_payload_aborts_before_any_send() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    opt_in(&*env.store, Channel::Sms, Some(1)).await;

    let mut req = request(&env, "txn-1");
    req.payload.remove("amount");
    let err = env.dispatcher.notify(req).await.unwrap_err();

    assert_eq!(err.code(), "MISSING_PAYLOAD_VALUE");
    assert!(env.transport.calls().is_empty());
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(1));
    assert_eq!(env.dispatcher.stats().aborted, 1);
}

#[tokio::test]
async fn test_unknown_template_aborts() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;

    let mut req = request(&env, "txn-1");
    req.template_id = Uuid::new_v4();
    let err = env.dispatcher.notify(req).await.unwrap_err();

    assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
    assert!(env.transport.calls().is_empty());
}

#[tokio::test]
async fn test_suppressed_email_is_skipped_and_counted() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    env.transport.suppress_email.store(true, Ordering::SeqCst);

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    let email = outcome.delivery(Channel::Email).unwrap();
    assert_eq!(email.status, DeliveryStatus::Skipped);
    assert_eq!(email.skip_reason.as_deref(), Some("Suppressed by transport"));
    assert_eq!(email.attempt_count, 1);
    assert!(email.provider_msg_id.is_none());
}

#[tokio::test]
async fn test_concurrent_notifies_never_overdraw_balance() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Sms, Some(1)).await;

    let (a, b) = tokio::join!(
        env.dispatcher.notify(request(&env, "txn-a")),
        env.dispatcher.notify(request(&env, "txn-b")),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let sent = outcomes
        .iter()
        .filter(|o| o.delivery(Channel::Sms).unwrap().status == DeliveryStatus::Sent)
        .count();
    assert_eq!(sent, 1);
    let skipped = outcomes
        .iter()
        .find(|o| o.delivery(Channel::Sms).unwrap().status == DeliveryStatus::Skipped)
        .unwrap();
    let reason = skipped.delivery(Channel::Sms).unwrap().skip_reason.clone().unwrap();
    assert!(reason.starts_with("Insufficient credit"));
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(0));
}

/// Memory store with injectable faults
struct FaultyStore {
    inner: MemoryNotificationStore,
    /// Served to the resolver in place of the live subscriptions
    stale_subscriptions: Option<Vec<Subscription>>,
    /// Channels whose delivery writes fail
    broken_channels: HashSet<Channel>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: MemoryNotificationStore::new(),
            stale_subscriptions: None,
            broken_channels: HashSet::new(),
        }
    }

    fn check(&self, channel: Channel) -> Result<(), StoreError> {
        if self.broken_channels.contains(&channel) {
            return Err(StoreError::Corrupt(format!("{} delivery writes unavailable", channel)));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for FaultyStore {
    fn backend_type(&self) -> &'static str {
        "faulty"
    }

    async fn upsert_notification(
        &self,
        key: &NotificationKey,
        template_id: Uuid,
        payload: &Payload,
    ) -> Result<Notification, StoreError> {
        self.inner.upsert_notification(key, template_id, payload).await
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        self.inner.get_notification(id).await
    }

    async fn deliveries(&self, notification_id: Uuid) -> Result<Vec<Delivery>, StoreError> {
        self.inner.deliveries(notification_id).await
    }

    async fn upsert_delivery(
        &self,
        notification_id: Uuid,
        channel: Channel,
        update: &DeliveryUpdate,
    ) -> Result<Delivery, StoreError> {
        self.check(channel)?;
        self.inner.upsert_delivery(notification_id, channel, update).await
    }

    async fn reserve_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<Reservation, StoreError> {
        self.check(channel)?;
        self.inner.reserve_delivery(notification_id, entity_id, channel).await
    }

    async fn refund_delivery(
        &self,
        notification_id: Uuid,
        entity_id: &str,
        channel: Channel,
    ) -> Result<bool, StoreError> {
        self.inner.refund_delivery(notification_id, entity_id, channel).await
    }

    async fn preferred_channels(
        &self,
        entity_id: &str,
        source_type: SourceType,
    ) -> Result<BTreeSet<Channel>, StoreError> {
        self.inner.preferred_channels(entity_id, source_type).await
    }

    async fn subscriptions(&self, entity_id: &str) -> Result<Vec<Subscription>, StoreError> {
        match &self.stale_subscriptions {
            Some(snapshot) => Ok(snapshot.clone()),
            None => self.inner.subscriptions(entity_id).await,
        }
    }

    async fn set_preference(
        &self,
        entity_id: &str,
        source_type: SourceType,
        channel: Channel,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.inner.set_preference(entity_id, source_type, channel, enabled).await
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.inner.upsert_subscription(subscription).await
    }

    async fn find_notifications(
        &self,
        query: &StatusQuery,
    ) -> Result<Vec<(Notification, Vec<Delivery>)>, StoreError> {
        self.inner.find_notifications(query).await
    }
}

#[tokio::test]
async fn test_reservation_race_is_reported_distinctly() {
    let env = build_env(true).await;
    let mut store = FaultyStore::new();
    store.stale_subscriptions = Some(vec![Subscription {
        entity_id: RECIPIENT.to_string(),
        channel: Channel::Sms,
        status: SubscriptionStatus::Active,
        balance: Some(1),
    }]);
    let store = Arc::new(store);
    opt_in(&*store, Channel::Sms, Some(0)).await;

    let dispatcher = NotificationDispatcher::new(
        store.clone(),
        env.dispatcher.templates().clone(),
        env.transport.clone(),
    );
    let outcome = dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    let sms = outcome.delivery(Channel::Sms).unwrap();
    assert_eq!(sms.status, DeliveryStatus::Skipped);
    assert_eq!(sms.skip_reason.as_deref(), Some("Insufficient credit (race)"));
    assert!(env.transport.calls().is_empty());
}

#[tokio::test]
async fn test_store_failure_in_one_channel_spares_siblings() {
    let env = build_env(true).await;
    let mut store = FaultyStore::new();
    // SMS fails at reservation, WHATSAPP at its SKIPPED write
    store.broken_channels = HashSet::from([Channel::Sms, Channel::Whatsapp]);
    let store = Arc::new(store);
    opt_in(&*store, Channel::Email, None).await;
    opt_in(&*store, Channel::Sms, Some(3)).await;

    let dispatcher = NotificationDispatcher::new(
        store.clone(),
        env.dispatcher.templates().clone(),
        env.transport.clone(),
    );
    let outcome = dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    assert_eq!(outcome.delivery(Channel::Email).unwrap().status, DeliveryStatus::Sent);
    assert!(outcome.delivery(Channel::Sms).is_none());
    assert!(outcome.delivery(Channel::Whatsapp).is_none());
    assert_eq!(outcome.overall, OverallStatus::Sent);

    let calls = env.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Channel::Email);
    assert_eq!(balance(&*store, Channel::Sms).await, Some(3));

    let stats = dispatcher.stats();
    assert_eq!(stats.store_errors, 2);
    assert_eq!(stats.deliveries_sent, 1);
    assert_eq!(stats.notifications, 1);
}

#[tokio::test]
async fn test_retry_channel_resends_failed_delivery() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    env.transport.fail(Channel::Email);

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();
    assert_eq!(outcome.overall, OverallStatus::Failed);

    env.transport.recover(Channel::Email);
    let retried = env
        .dispatcher
        .retry_channel(outcome.notification.id, Channel::Email, &recipient())
        .await
        .unwrap();

    let email = retried.delivery(Channel::Email).unwrap();
    assert_eq!(email.status, DeliveryStatus::Sent);
    assert!(email.error.is_none());
    assert_eq!(email.attempt_count, 2);
    assert_eq!(retried.overall, OverallStatus::Partial);
}

#[tokio::test]
async fn test_retry_channel_reports_ineligibility() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();
    let retried = env
        .dispatcher
        .retry_channel(outcome.notification.id, Channel::Sms, &recipient())
        .await
        .unwrap();

    assert_eq!(
        retried.delivery(Channel::Sms).unwrap().skip_reason.as_deref(),
        Some("Not preferred")
    );
    assert_eq!(env.transport.calls().len(), 1);
}

#[tokio::test]
async fn test_get_statuses_matches_single_rollup() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    opt_in(&*env.store, Channel::Sms, Some(5)).await;
    env.transport.fail(Channel::Sms);

    let partial = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();
    env.transport.fail(Channel::Email);
    let failed = env.dispatcher.notify(request(&env, "txn-2")).await.unwrap();

    let statuses = env
        .dispatcher
        .get_statuses(&StatusQuery {
            school_id: SCHOOL.to_string(),
            source_type: SourceType::Transaction,
            source_ids: vec!["txn-1".to_string(), "txn-2".to_string(), "txn-3".to_string()],
            recipient_id: Some(RECIPIENT.to_string()),
        })
        .await
        .unwrap();

    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses["txn-1"].overall, partial.overall);
    assert_eq!(statuses["txn-1"].overall, OverallStatus::Partial);
    assert_eq!(statuses["txn-2"].overall, failed.overall);
    assert_eq!(statuses["txn-2"].overall, OverallStatus::Failed);
    assert_eq!(statuses["txn-3"].overall, OverallStatus::NotSent);
    assert!(statuses["txn-3"].channels.is_empty());
    assert_eq!(
        statuses["txn-1"].channels.get(&Channel::Sms),
        Some(&DeliveryStatus::Failed)
    );
}

#[tokio::test]
async fn test_get_statuses_scoped_to_school() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    let statuses = env
        .dispatcher
        .get_statuses(&StatusQuery {
            school_id: "school-2".to_string(),
            source_type: SourceType::Transaction,
            source_ids: vec!["txn-1".to_string()],
            recipient_id: None,
        })
        .await
        .unwrap();

    assert_eq!(statuses["txn-1"].overall, OverallStatus::NotSent);
}

#[tokio::test]
async fn test_stats_track_delivery_outcomes() {
    let env = build_env(false).await;
    opt_in(&*env.store, Channel::Email, None).await;
    opt_in(&*env.store, Channel::Sms, Some(1)).await;
    env.transport.fail(Channel::Sms);

    env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();

    let stats = env.dispatcher.stats();
    assert_eq!(stats.notifications, 1);
    assert_eq!(stats.deliveries_sent, 1);
    assert_eq!(stats.deliveries_failed, 1);
    assert_eq!(stats.deliveries_skipped, 1);
    assert_eq!(stats.store_errors, 0);
}

#[tokio::test]
async fn test_template_for_other_source_type_is_not_found() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    env.store
        .set_preference(RECIPIENT, SourceType::Grade, Channel::Email, true)
        .await
        .unwrap();

    let mut req = request(&env, "grade-1");
    req.source_type = SourceType::Grade;
    let err = env.dispatcher.notify(req).await.unwrap_err();

    assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
    assert!(env.transport.calls().is_empty());
}

#[tokio::test]
async fn test_retry_channel_leaves_sent_delivery_alone() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Sms, Some(5)).await;

    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(4));

    let retried = env
        .dispatcher
        .retry_channel(outcome.notification.id, Channel::Sms, &recipient())
        .await
        .unwrap();

    let sms = retried.delivery(Channel::Sms).unwrap();
    assert_eq!(sms.status, DeliveryStatus::Sent);
    assert_eq!(sms.attempt_count, 1);
    assert_eq!(env.transport.calls().len(), 1);
    assert_eq!(balance(&*env.store, Channel::Sms).await, Some(4));
}

#[tokio::test]
async fn test_retry_channel_waits_for_send_in_flight() {
    let env = build_env(true).await;
    opt_in(&*env.store, Channel::Email, None).await;
    let outcome = env.dispatcher.notify(request(&env, "txn-1")).await.unwrap();
    let id = outcome.notification.id;

    opt_in(&*env.store, Channel::Whatsapp, Some(2)).await;
    let reservation = env
        .store
        .reserve_delivery(id, RECIPIENT, Channel::Whatsapp)
        .await
        .unwrap();
    assert!(matches!(reservation, Reservation::Reserved(_)));

    let retried = env
        .dispatcher
        .retry_channel(id, Channel::Whatsapp, &recipient())
        .await
        .unwrap();

    assert_eq!(
        retried.delivery(Channel::Whatsapp).unwrap().status,
        DeliveryStatus::Pending
    );
    assert_eq!(env.transport.calls().len(), 1);
    assert_eq!(balance(&*env.store, Channel::Whatsapp).await, Some(1));
}
