//! Payment processor webhook intake.
//!
//! Events carry a `t=<unix>,v1=<hex>` signature header: HMAC-SHA256 over
//! `"{t}.{body}"` with the endpoint secret, accepted within five minutes.

use std::collections::HashMap;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{WebhookLog, WebhookSource};
use hmac::{Hmac, Mac, digest::InvalidLength};
use order_store::OrderStore;
use serde::Deserialize;
use sha2::Sha256;

use crate::coordinator::ProvisioningCoordinator;
use crate::error::{FulfillmentError, Result};
use crate::services::ProvisioningProvider;
use crate::webhook::{Rejection, ReplaySummary, WebhookOutcome};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the `t=..,v1=..` signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum age of a signed event, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";

fn keyed_mac(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> std::result::Result<HmacSha256, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Computes the `v1` signature for a payload.
pub fn sign(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> std::result::Result<String, InvalidLength> {
    let mac = keyed_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a `t=..,v1=..` header against the payload at time `now`.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
) -> std::result::Result<(), Rejection> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return Err(Rejection::MissingHeaders);
    };
    if signatures.is_empty() {
        return Err(Rejection::MissingHeaders);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(Rejection::StaleTimestamp);
    }

    let valid = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        match keyed_mac(secret, timestamp, payload) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    });

    if valid {
        Ok(())
    } else {
        Err(Rejection::InvalidSignature)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub object: PaymentObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentObject {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentEvent {
    fn metadata(&self, key: &str) -> Result<&str> {
        self.data
            .object
            .metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| {
                FulfillmentError::Validation(format!("{} event without metadata.{key}", self.kind))
            })
    }

    pub fn order_id(&self) -> Result<OrderId> {
        self.metadata("order_id")?
            .parse()
            .map_err(|_| FulfillmentError::Validation("metadata.order_id is not a UUID".to_string()))
    }

    pub fn user_id(&self) -> Result<UserId> {
        self.metadata("user_id")?
            .parse()
            .map_err(|_| FulfillmentError::Validation("metadata.user_id is not a UUID".to_string()))
    }
}

/// Verifies, logs and applies payment processor events.
pub struct PaymentWebhookHandler<S, P> {
    coordinator: ProvisioningCoordinator<S, P>,
    secret: Option<String>,
}

impl<S, P> PaymentWebhookHandler<S, P>
where
    S: OrderStore + Clone,
    P: ProvisioningProvider,
{
    pub fn new(coordinator: ProvisioningCoordinator<S, P>, secret: Option<String>) -> Self {
        Self {
            coordinator,
            secret,
        }
    }

    #[tracing::instrument(skip_all, fields(bytes = raw_body.len()))]
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome> {
        if let Err(rejection) = self.authenticate(raw_body, signature_header) {
            metrics::counter!("webhooks_rejected_total", "source" => "payment").increment(1);
            tracing::warn!(reason = rejection.as_str(), "payment webhook rejected");
            return Ok(WebhookOutcome::Rejected(rejection));
        }

        let payload = std::str::from_utf8(raw_body)
            .map_err(|e| FulfillmentError::Validation(format!("webhook body is not UTF-8: {e}")))?;
        let event: PaymentEvent = serde_json::from_str(payload)
            .map_err(|e| FulfillmentError::Validation(format!("malformed payment event: {e}")))?;

        let log = self
            .coordinator
            .store()
            .append_webhook_log(WebhookSource::Payment, &event.kind, payload)
            .await?;
        metrics::counter!("webhooks_received_total", "source" => "payment").increment(1);

        self.apply(&log, &event).await?;

        Ok(WebhookOutcome::Accepted {
            log_id: log.id,
            kind: event.kind,
        })
    }

    /// Re-applies payment events left unprocessed, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn replay_unprocessed(&self) -> Result<ReplaySummary> {
        let pending = self
            .coordinator
            .store()
            .list_unprocessed_webhooks(WebhookSource::Payment)
            .await?;

        let mut summary = ReplaySummary::default();
        for log in pending {
            let applied = match serde_json::from_str::<PaymentEvent>(&log.payload) {
                Ok(event) => self.apply(&log, &event).await,
                Err(e) => Err(e.into()),
            };
            match applied {
                Ok(()) => summary.replayed += 1,
                Err(err) => {
                    tracing::warn!(log_id = %log.id, error = %err, "payment event replay failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn authenticate(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> std::result::Result<(), Rejection> {
        // Without a secret every event is refused.
        let Some(secret) = self.secret.as_deref() else {
            return Err(Rejection::MissingHeaders);
        };
        let header = signature_header.ok_or(Rejection::MissingHeaders)?;
        verify_signature(secret, header, raw_body, Utc::now().timestamp())
    }

    async fn apply(&self, log: &WebhookLog, event: &PaymentEvent) -> Result<()> {
        if let Err(err) = self.dispatch(event).await {
            tracing::warn!(
                log_id = %log.id,
                kind = %event.kind,
                error = %err,
                "payment event handler failed; left unprocessed"
            );
            return Err(err);
        }
        self.coordinator
            .store()
            .mark_webhook_processed(log.id)
            .await?;
        Ok(())
    }

    async fn dispatch(&self, event: &PaymentEvent) -> Result<()> {
        match event.kind.as_str() {
            CHECKOUT_COMPLETED => {
                let order_id = event.order_id()?;
                let result = self
                    .coordinator
                    .confirm_payment(order_id, event.user_id()?)
                    .await;
                match result {
                    Ok(order) => {
                        tracing::info!(%order_id, status = %order.status, "payment applied");
                        Ok(())
                    }
                    // The order is FAILED and nothing a redelivery does changes that.
                    Err(FulfillmentError::ProvisioningFailed { reason, .. }) => {
                        tracing::warn!(%order_id, %reason, "paid order failed provisioning");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            CHECKOUT_EXPIRED | PAYMENT_FAILED => {
                let order_id = event.order_id()?;
                match self.coordinator.cancel(order_id).await {
                    Ok(_) => Ok(()),
                    Err(FulfillmentError::InvalidState { status, .. }) => {
                        tracing::info!(%order_id, %status, "payment abandoned for order past cancellation");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            other => {
                tracing::debug!(kind = %other, "ignoring payment event");
                Ok(())
            }
        }
    }
}
