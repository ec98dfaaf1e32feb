//! Channel eligibility resolution.
//!
//! Gates run per channel in a fixed order; the first failing gate is the
//! reported reason:
//! 1. preference row for (recipient, source type, channel)
//! 2. active subscription for (recipient, channel)
//! 3. metered channels only: balance record present and positive

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::StoreError;

use super::backend::NotificationStore;
use super::types::{Channel, SkipReason, SourceType, Subscription};

/// A channel that failed one of the gates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IneligibleChannel {
    pub channel: Channel,
    pub reason: SkipReason,
}

impl Serialize for IneligibleChannel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("IneligibleChannel", 2)?;
        state.serialize_field("channel", &self.channel)?;
        state.serialize_field("reason", self.reason.as_str())?;
        state.end()
    }
}

/// Resolver output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: Vec<Channel>,
    pub ineligible: Vec<IneligibleChannel>,
}

/// Evaluate the gates for a single channel.
pub fn evaluate_channel(
    channel: Channel,
    preferred: &BTreeSet<Channel>,
    subscription: Option<&Subscription>,
) -> Result<(), SkipReason> {
    if !preferred.contains(&channel) {
        return Err(SkipReason::NotPreferred);
    }

    let subscription = match subscription {
        Some(s) if s.is_active() => s,
        _ => return Err(SkipReason::NotSubscribed),
    };

    if channel.is_metered() {
        match subscription.balance {
            None => return Err(SkipReason::NoBalanceRecord),
            Some(balance) if balance <= 0 => return Err(SkipReason::InsufficientCredit),
            Some(_) => {}
        }
    }

    Ok(())
}

/// Computes which channels a recipient can receive a source type on
pub struct EligibilityResolver {
    store: Arc<dyn NotificationStore>,
}

impl EligibilityResolver {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Resolve eligibility across every known channel
    pub async fn resolve(
        &self,
        recipient_id: &str,
        source_type: SourceType,
    ) -> Result<Eligibility, StoreError> {
        self.resolve_channels(recipient_id, source_type, &Channel::ALL)
            .await
    }

    /// Resolve eligibility for a subset of channels
    pub async fn resolve_channels(
        &self,
        recipient_id: &str,
        source_type: SourceType,
        channels: &[Channel],
    ) -> Result<Eligibility, StoreError> {
        let preferred = self
            .store
            .preferred_channels(recipient_id, source_type)
            .await?;
        let subscriptions = self.store.subscriptions(recipient_id).await?;

        let mut eligibility = Eligibility::default();
        for &channel in channels {
            let subscription = subscriptions.iter().find(|s| s.channel == channel);
            match evaluate_channel(channel, &preferred, subscription) {
                Ok(()) => eligibility.eligible.push(channel),
                Err(reason) => eligibility
                    .ineligible
                    .push(IneligibleChannel { channel, reason }),
            }
        }

        tracing::debug!(
            recipient_id = %recipient_id,
            source_type = %source_type,
            eligible = ?eligibility.eligible,
            ineligible = eligibility.ineligible.len(),
            "Resolved channel eligibility"
        );

        Ok(eligibility)
    }
}
