//! Outbound transport seam.
//!
//! Provider SDK integrations live outside the engine; they plug in by
//! implementing `Transport`. `LogTransport` is the built-in implementation
//! used in development: it logs each send and returns a synthetic id.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// A transport capability threw
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn code(&self) -> &'static str {
        "TRANSPORT_FAILURE"
    }
}

/// Provider acknowledgement of an accepted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderReceipt {
    pub provider: String,
    pub provider_msg_id: String,
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body_text: String,
}

/// SMS and WhatsApp share the same shape
#[derive(Debug, Clone)]
pub struct TextMessage {
    pub to_phone: String,
    pub body_text: String,
}

/// Channel send capabilities.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `Ok(None)` means the provider suppressed the message (e.g. a test
    /// address): no failure, but nothing was sent.
    async fn send_email(&self, message: &EmailMessage) -> Result<Option<ProviderReceipt>, TransportError>;

    async fn send_sms(&self, message: &TextMessage) -> Result<ProviderReceipt, TransportError>;

    async fn send_whatsapp(&self, message: &TextMessage) -> Result<ProviderReceipt, TransportError>;
}

/// Transport that logs instead of calling a provider
pub struct LogTransport {
    suppressed_email_domains: Vec<String>,
}

impl LogTransport {
    pub fn new(suppressed_email_domains: Vec<String>) -> Self {
        Self {
            suppressed_email_domains: suppressed_email_domains
                .into_iter()
                .map(|d| d.trim_start_matches('@').to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_suppressed(&self, email: &str) -> bool {
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        let domain = domain.to_ascii_lowercase();
        self.suppressed_email_domains.iter().any(|d| *d == domain)
    }

    fn receipt() -> ProviderReceipt {
        ProviderReceipt {
            provider: "log".to_string(),
            provider_msg_id: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send_email(&self, message: &EmailMessage) -> Result<Option<ProviderReceipt>, TransportError> {
        if self.is_suppressed(&message.to_email) {
            tracing::info!(to = %message.to_email, "Email suppressed for test domain");
            return Ok(None);
        }

        let receipt = Self::receipt();
        tracing::info!(
            to = %message.to_email,
            subject = %message.subject,
            provider_msg_id = %receipt.provider_msg_id,
            "Email sent"
        );
        Ok(Some(receipt))
    }

    async fn send_sms(&self, message: &TextMessage) -> Result<ProviderReceipt, TransportError> {
        let receipt = Self::receipt();
        tracing::info!(to = %message.to_phone, provider_msg_id = %receipt.provider_msg_id, "SMS sent");
        Ok(receipt)
    }

    async fn send_whatsapp(&self, message: &TextMessage) -> Result<ProviderReceipt, TransportError> {
        let receipt = Self::receipt();
        tracing::info!(
            to = %message.to_phone,
            provider_msg_id = %receipt.provider_msg_id,
            "WhatsApp message sent"
        );
        Ok(receipt)
    }
}
