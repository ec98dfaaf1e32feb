//! Notification domain types: channels, source types, payloads and delivery rows.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when parsing one of the closed enums from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
}

impl Channel {
    /// Every channel the engine knows about, in evaluation order.
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Whatsapp];

    /// Metered channels consume one subscription credit per send.
    pub fn is_metered(self) -> bool {
        matches!(self, Channel::Sms | Channel::Whatsapp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::Whatsapp => "WHATSAPP",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(Channel::Email),
            "SMS" => Ok(Channel::Sms),
            "WHATSAPP" => Ok(Channel::Whatsapp),
            other => Err(ParseEnumError {
                kind: "channel",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of event a notification is raised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Transaction,
    Grade,
    Attendance,
    Announcement,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Transaction => "TRANSACTION",
            SourceType::Grade => "GRADE",
            SourceType::Attendance => "ATTENDANCE",
            SourceType::Announcement => "ANNOUNCEMENT",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSACTION" => Ok(SourceType::Transaction),
            "GRADE" => Ok(SourceType::Grade),
            "ATTENDANCE" => Ok(SourceType::Attendance),
            "ANNOUNCEMENT" => Ok(SourceType::Announcement),
            other => Err(ParseEnumError {
                kind: "source type",
                value: other.to_string(),
            }),
        }
    }
}

/// A single payload value.
///
/// JSON input never produces `Date`: ISO strings stay strings. Dates are
/// built in code by callers that hold a real timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Date(#[serde(serialize_with = "serialize_date")] DateTime<Utc>),
    List(Vec<PayloadValue>),
    Map(BTreeMap<String, PayloadValue>),
}

/// Dates serialize in the same text form they render in, so a payload read
/// back from storage renders identically.
fn serialize_date<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl PayloadValue {
    /// Text form used when substituting into a template, or `None` when the
    /// value counts as missing (null, empty or whitespace-only string).
    pub fn render(&self) -> Option<String> {
        match self {
            PayloadValue::Null => None,
            PayloadValue::String(s) if s.trim().is_empty() => None,
            PayloadValue::String(s) => Some(s.clone()),
            PayloadValue::Bool(b) => Some(b.to_string()),
            PayloadValue::Number(n) => Some(n.to_string()),
            PayloadValue::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            PayloadValue::List(_) | PayloadValue::Map(_) => serde_json::to_string(self).ok(),
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::String(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::String(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Number(value.into())
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for PayloadValue {
    fn from(value: DateTime<Utc>) -> Self {
        PayloadValue::Date(value)
    }
}

/// Variable values captured at trigger time
pub type Payload = BTreeMap<String, PayloadValue>;

/// Person (or guardian account) a notification is addressed to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Recipient {
    /// Address on file for the given channel, ignoring blank values.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        let address = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms | Channel::Whatsapp => self.phone.as_deref(),
        };
        address.filter(|a| !a.trim().is_empty())
    }
}

/// Idempotency key of a notification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationKey {
    pub school_id: String,
    pub recipient_id: String,
    pub source_type: SourceType,
    pub source_id: String,
}

/// One logical event delivered to one recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub school_id: String,
    pub recipient_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub template_id: Uuid,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn key(&self) -> NotificationKey {
        NotificationKey {
            school_id: self.school_id.clone(),
            recipient_id: self.recipient_id.clone(),
            source_type: self.source_type,
            source_id: self.source_id.clone(),
        }
    }
}

/// Status of a single channel delivery row. An absent row means not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Skipped => "SKIPPED",
        }
    }

    /// FAILED and SKIPPED rows may be re-sent; SENT and PENDING may not.
    pub fn is_retryable(self) -> bool {
        matches!(self, DeliveryStatus::Failed | DeliveryStatus::Skipped)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DeliveryStatus::Pending),
            "SENT" => Ok(DeliveryStatus::Sent),
            "FAILED" => Ok(DeliveryStatus::Failed),
            "SKIPPED" => Ok(DeliveryStatus::Skipped),
            other => Err(ParseEnumError {
                kind: "delivery status",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a channel was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotPreferred,
    NotSubscribed,
    NoBalanceRecord,
    InsufficientCredit,
    InsufficientCreditRace,
    NoEmail,
    NoPhone,
    Suppressed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NotPreferred => "Not preferred",
            SkipReason::NotSubscribed => "Not subscribed",
            SkipReason::NoBalanceRecord => "No balance record",
            SkipReason::InsufficientCredit => "Insufficient credit",
            SkipReason::InsufficientCreditRace => "Insufficient credit (race)",
            SkipReason::NoEmail => "Recipient has no email",
            SkipReason::NoPhone => "Recipient has no phone",
            SkipReason::Suppressed => "Suppressed by transport",
        }
    }

    /// Missing-contact reason for a channel.
    pub fn no_contact(channel: Channel) -> Self {
        match channel {
            Channel::Email => SkipReason::NoEmail,
            Channel::Sms | Channel::Whatsapp => SkipReason::NoPhone,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel delivery row, unique on (notification_id, channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: Channel,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub credit_refunded: bool,
    pub updated_at: DateTime<Utc>,
}

/// State transition written onto a delivery row
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryUpdate {
    Skipped {
        reason: String,
        /// Suppressed sends count as an attempt, eligibility skips do not.
        attempted: bool,
    },
    Pending,
    Sent {
        provider: String,
        provider_msg_id: String,
        sent_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

impl DeliveryUpdate {
    pub fn skipped(reason: SkipReason) -> Self {
        DeliveryUpdate::Skipped {
            reason: reason.as_str().to_string(),
            attempted: false,
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryUpdate::Skipped { .. } => DeliveryStatus::Skipped,
            DeliveryUpdate::Pending => DeliveryStatus::Pending,
            DeliveryUpdate::Sent { .. } => DeliveryStatus::Sent,
            DeliveryUpdate::Failed { .. } => DeliveryStatus::Failed,
        }
    }

    /// How much this transition adds to the attempt counter.
    pub fn attempt_increment(&self) -> i32 {
        match self {
            DeliveryUpdate::Sent { .. } | DeliveryUpdate::Failed { .. } => 1,
            DeliveryUpdate::Skipped { attempted, .. } => i32::from(*attempted),
            DeliveryUpdate::Pending => 0,
        }
    }

    /// Column values the transition writes. Every column is overwritten.
    pub fn columns(&self) -> DeliveryColumns {
        let mut cols = DeliveryColumns {
            status: self.status(),
            ..DeliveryColumns::default()
        };
        match self {
            DeliveryUpdate::Skipped { reason, .. } => cols.skip_reason = Some(reason.clone()),
            DeliveryUpdate::Pending => {}
            DeliveryUpdate::Sent {
                provider,
                provider_msg_id,
                sent_at,
            } => {
                cols.provider = Some(provider.clone());
                cols.provider_msg_id = Some(provider_msg_id.clone());
                cols.sent_at = Some(*sent_at);
            }
            DeliveryUpdate::Failed { error } => cols.error = Some(error.clone()),
        }
        cols
    }
}

/// Flattened column values for a delivery transition
#[derive(Debug, Clone)]
pub struct DeliveryColumns {
    pub status: DeliveryStatus,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub provider: Option<String>,
    pub provider_msg_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Default for DeliveryColumns {
    fn default() -> Self {
        Self {
            status: DeliveryStatus::Pending,
            skip_reason: None,
            error: None,
            provider: None,
            provider_msg_id: None,
            sent_at: None,
        }
    }
}

impl Delivery {
    /// Fresh row for a channel that has never been attempted.
    pub fn new(notification_id: Uuid, channel: Channel) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            channel,
            status: DeliveryStatus::Pending,
            skip_reason: None,
            error: None,
            provider: None,
            provider_msg_id: None,
            sent_at: None,
            attempt_count: 0,
            credit_refunded: false,
            updated_at: Utc::now(),
        }
    }

    /// Overwrite the row in place with a transition.
    pub fn apply(&mut self, update: &DeliveryUpdate) {
        let cols = update.columns();
        self.status = cols.status;
        self.skip_reason = cols.skip_reason;
        self.error = cols.error;
        self.provider = cols.provider;
        self.provider_msg_id = cols.provider_msg_id;
        self.sent_at = cols.sent_at;
        self.attempt_count += update.attempt_increment();
        if matches!(update, DeliveryUpdate::Pending) {
            self.credit_refunded = false;
        }
        self.updated_at = Utc::now();
    }
}

/// Derived status over all delivery rows of one or more notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    NotSent,
    Sent,
    Partial,
    Failed,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::NotSent => "NOT_SENT",
            OverallStatus::Sent => "SENT",
            OverallStatus::Partial => "PARTIAL",
            OverallStatus::Failed => "FAILED",
        }
    }

    /// Roll delivery statuses up into one overall status.
    pub fn rollup<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = DeliveryStatus>,
    {
        let mut total = 0usize;
        let mut sent = 0usize;
        let mut failed = 0usize;
        for status in statuses {
            total += 1;
            match status {
                DeliveryStatus::Sent => sent += 1,
                DeliveryStatus::Failed => failed += 1,
                _ => {}
            }
        }

        if total == 0 {
            OverallStatus::NotSent
        } else if sent == total {
            OverallStatus::Sent
        } else if sent > 0 {
            OverallStatus::Partial
        } else if failed > 0 {
            OverallStatus::Failed
        } else {
            OverallStatus::NotSent
        }
    }
}

/// Subscription status for an (entity, channel) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "INACTIVE" => Ok(SubscriptionStatus::Inactive),
            other => Err(ParseEnumError {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

/// Recipient opt-in plus metered balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub entity_id: String,
    pub channel: Channel,
    pub status: SubscriptionStatus,
    /// Remaining credits. `None` means no balance record exists.
    pub balance: Option<i64>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Notification together with its delivery rows and rollup
#[derive(Debug, Clone, Serialize)]
pub struct NotificationOutcome {
    pub notification: Notification,
    pub deliveries: Vec<Delivery>,
    pub overall: OverallStatus,
}

impl NotificationOutcome {
    pub fn new(notification: Notification, mut deliveries: Vec<Delivery>) -> Self {
        deliveries.sort_by_key(|d| d.channel);
        let overall = OverallStatus::rollup(deliveries.iter().map(|d| d.status));
        Self {
            notification,
            deliveries,
            overall,
        }
    }

    pub fn delivery(&self, channel: Channel) -> Option<&Delivery> {
        self.deliveries.iter().find(|d| d.channel == channel)
    }
}

/// Read-side filter for status queries
#[derive(Debug, Clone, Deserialize)]
pub struct StatusQuery {
    pub school_id: String,
    pub source_type: SourceType,
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

/// Rollup for one source id
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub overall: OverallStatus,
    pub channels: BTreeMap<Channel, DeliveryStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rollup_empty_is_not_sent() {
        assert_eq!(OverallStatus::rollup(Vec::<DeliveryStatus>::new()), OverallStatus::NotSent);
    }

    #[test]
    fn test_rollup_all_sent() {
        let statuses = [DeliveryStatus::Sent, DeliveryStatus::Sent];
        assert_eq!(OverallStatus::rollup(statuses), OverallStatus::Sent);
    }

    #[test]
    fn test_rollup_sent_and_skipped_is_partial() {
        let statuses = [DeliveryStatus::Sent, DeliveryStatus::Skipped];
        assert_eq!(OverallStatus::rollup(statuses), OverallStatus::Partial);
    }

    #[test]
    fn test_rollup_failed_without_sent() {
        let statuses = [DeliveryStatus::Failed, DeliveryStatus::Skipped];
        assert_eq!(OverallStatus::rollup(statuses), OverallStatus::Failed);
    }

    #[test]
    fn test_rollup_only_skipped_is_not_sent() {
        let statuses = [DeliveryStatus::Skipped, DeliveryStatus::Pending];
        assert_eq!(OverallStatus::rollup(statuses), OverallStatus::NotSent);
    }

    #[test]
    fn test_channel_parse_and_metering() {
        assert_eq!("SMS".parse::<Channel>().unwrap(), Channel::Sms);
        assert!("FAX".parse::<Channel>().is_err());
        assert!(Channel::Whatsapp.is_metered());
        assert!(!Channel::Email.is_metered());
    }

    #[test]
    fn test_payload_value_render() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(
            PayloadValue::from(date).render().as_deref(),
            Some("2024-03-01T08:30:00.000Z")
        );
        assert_eq!(PayloadValue::from(42i64).render().as_deref(), Some("42"));
        assert_eq!(PayloadValue::from("   ").render(), None);
        assert_eq!(PayloadValue::Null.render(), None);

        let mut nested = BTreeMap::new();
        nested.insert("a".to_string(), PayloadValue::from(1i64));
        assert_eq!(
            PayloadValue::Map(nested).render().as_deref(),
            Some(r#"{"a":1}"#)
        );
    }

    #[test]
    fn test_payload_deserializes_iso_strings_as_strings() {
        let payload: Payload = serde_json::from_value(serde_json::json!({
            "due": "2024-03-01T08:30:00Z",
            "amount": 12.5,
            "paid": false,
            "missing": null
        }))
        .unwrap();

        assert_eq!(
            payload["due"],
            PayloadValue::String("2024-03-01T08:30:00Z".to_string())
        );
        assert_eq!(payload["amount"].render().as_deref(), Some("12.5"));
        assert_eq!(payload["paid"], PayloadValue::Bool(false));
        assert_eq!(payload["missing"], PayloadValue::Null);
    }

    #[test]
    fn test_stored_date_renders_like_the_original() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let mut payload = Payload::new();
        payload.insert("due".to_string(), PayloadValue::from(date));

        let stored = serde_json::to_value(&payload).unwrap();
        assert_eq!(stored["due"], "2024-03-01T08:30:00.000Z");

        let loaded: Payload = serde_json::from_value(stored).unwrap();
        assert_eq!(loaded["due"].render(), payload["due"].render());
    }

    #[test]
    fn test_only_failed_and_skipped_are_retryable() {
        assert!(DeliveryStatus::Failed.is_retryable());
        assert!(DeliveryStatus::Skipped.is_retryable());
        assert!(!DeliveryStatus::Sent.is_retryable());
        assert!(!DeliveryStatus::Pending.is_retryable());
    }

    #[test]
    fn test_delivery_apply_accumulates_attempts() {
        let mut delivery = Delivery::new(Uuid::new_v4(), Channel::Sms);
        delivery.apply(&DeliveryUpdate::Pending);
        assert_eq!(delivery.attempt_count, 0);

        delivery.apply(&DeliveryUpdate::Failed {
            error: "boom".to_string(),
        });
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempt_count, 1);

        delivery.apply(&DeliveryUpdate::Pending);
        assert!(delivery.error.is_none());

        delivery.apply(&DeliveryUpdate::Sent {
            provider: "log".to_string(),
            provider_msg_id: "m-1".to_string(),
            sent_at: Utc::now(),
        });
        assert_eq!(delivery.status, DeliveryStatus::Sent);
        assert_eq!(delivery.attempt_count, 2);
        assert!(delivery.error.is_none());
        assert!(delivery.skip_reason.is_none());
    }

    #[test]
    fn test_recipient_address_ignores_blank() {
        let recipient = Recipient {
            id: "r1".to_string(),
            email: Some("  ".to_string()),
            phone: Some("+15550001".to_string()),
        };
        assert_eq!(recipient.address_for(Channel::Email), None);
        assert_eq!(recipient.address_for(Channel::Whatsapp), Some("+15550001"));
    }
}
