//! Webhook audit log records.

use chrono::{DateTime, Utc};
use common::WebhookLogId;
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Who sent a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookSource {
    Provider,
    Payment,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Provider => "PROVIDER",
            WebhookSource::Payment => "PAYMENT",
        }
    }
}

impl std::str::FromStr for WebhookSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROVIDER" => Ok(WebhookSource::Provider),
            "PAYMENT" => Ok(WebhookSource::Payment),
            other => Err(DomainError::UnknownValue {
                kind: "webhook source",
                value: other.to_string(),
            }),
        }
    }
}

/// An accepted inbound notification, stored verbatim before it is handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: WebhookLogId,
    pub source: WebhookSource,

    /// Notification type, e.g. `ORDER_STATUS` or `checkout.session.completed`.
    pub kind: String,

    /// Raw request body exactly as received.
    pub payload: String,
    pub processed: bool,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookLog {
    pub fn received(
        source: WebhookSource,
        kind: impl Into<String>,
        payload: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WebhookLogId::new(),
            source,
            kind: kind.into(),
            payload: payload.into(),
            processed: false,
            received_at: now,
            processed_at: None,
        }
    }
}
