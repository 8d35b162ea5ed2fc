//! Provider webhook reconciliation.
//!
//! Notifications are authenticated, written to the audit log, then applied
//! through the same idempotent primitives the poll loop uses. A handler
//! failure leaves the log entry unprocessed so it can be replayed.

use common::WebhookLogId;
use domain::{DataVolume, ProfileStatus, WebhookLog, WebhookSource};
use order_store::OrderStore;
use provider::signing;
use serde::Deserialize;
use serde_json::Value;

use crate::coordinator::ProvisioningCoordinator;
use crate::error::{FulfillmentError, Result};
use crate::services::ProvisioningProvider;

/// Credentials used to authenticate provider webhooks.
#[derive(Clone, Default)]
pub struct ProviderWebhookAuth {
    pub access_code: String,

    /// Without a secret, signatures are not checked and every call logs a
    /// warning.
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for ProviderWebhookAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderWebhookAuth")
            .field("access_code", &self.access_code)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Signature headers of an inbound provider webhook.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub request_id: Option<String>,
}

/// Why a webhook was refused before it was logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingHeaders,
    InvalidSignature,
    StaleTimestamp,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MissingHeaders => "missing signature headers",
            Rejection::InvalidSignature => "invalid signature",
            Rejection::StaleTimestamp => "timestamp outside tolerance",
        }
    }
}

/// Result of ingesting a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Logged and applied.
    Accepted { log_id: WebhookLogId, kind: String },
    Rejected(Rejection),
}

/// Counts from a replay of unprocessed log entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub failed: usize,
}

/// Notification types the provider sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyType {
    OrderStatus,
    DataUsage,
    BalanceAlert,
    SmdpEvent,
    Unknown,
}

impl NotifyType {
    pub fn parse(value: &str) -> Self {
        match value {
            "ORDER_STATUS" => NotifyType::OrderStatus,
            "DATA_USAGE" => NotifyType::DataUsage,
            "BALANCE_ALERT" | "LOW_BALANCE" => NotifyType::BalanceAlert,
            "SMDP_EVENT" => NotifyType::SmdpEvent,
            _ => NotifyType::Unknown,
        }
    }
}

/// Usage carried by a `DATA_USAGE` notification: either the consumed bytes
/// alone or consumed and total bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UsageReport {
    Bytes(u64),
    #[serde(rename_all = "camelCase")]
    Detailed {
        #[serde(alias = "dataUsage", alias = "orderUsage")]
        used_volume: u64,
        #[serde(default, alias = "totalData")]
        total_volume: Option<u64>,
    },
}

impl UsageReport {
    pub fn used(&self) -> DataVolume {
        match self {
            UsageReport::Bytes(used) => DataVolume::from_bytes(*used),
            UsageReport::Detailed { used_volume, .. } => DataVolume::from_bytes(*used_volume),
        }
    }

    pub fn total(&self) -> Option<DataVolume> {
        match self {
            UsageReport::Bytes(_) => None,
            UsageReport::Detailed { total_volume, .. } => {
                total_volume.map(DataVolume::from_bytes)
            }
        }
    }
}

/// A provider notification body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderNotification {
    pub notify_type: String,
    #[serde(default)]
    pub order_no: Option<String>,
    #[serde(default)]
    pub esim_tran_no: Option<String>,
    #[serde(default)]
    pub usage: Option<UsageReport>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl ProviderNotification {
    pub fn kind(&self) -> NotifyType {
        NotifyType::parse(&self.notify_type)
    }

    fn require_esim_tran_no(&self) -> Result<&str> {
        self.esim_tran_no.as_deref().ok_or_else(|| {
            FulfillmentError::Validation(format!("{} without esimTranNo", self.notify_type))
        })
    }
}

/// Authenticates, logs and applies provider webhooks.
pub struct WebhookReconciler<S, P> {
    coordinator: ProvisioningCoordinator<S, P>,
    auth: ProviderWebhookAuth,
}

impl<S, P> WebhookReconciler<S, P>
where
    S: OrderStore + Clone,
    P: ProvisioningProvider,
{
    pub fn new(coordinator: ProvisioningCoordinator<S, P>, auth: ProviderWebhookAuth) -> Self {
        Self { coordinator, auth }
    }

    /// Ingests one provider webhook.
    ///
    /// Authentication failures are returned as [`WebhookOutcome::Rejected`]
    /// without touching storage. Malformed bodies fail with a validation
    /// error. Handler errors propagate after the entry has been logged.
    #[tracing::instrument(skip_all, fields(bytes = raw_body.len()))]
    pub async fn ingest(&self, raw_body: &[u8], headers: &WebhookHeaders) -> Result<WebhookOutcome> {
        if let Err(rejection) = self.authenticate(raw_body, headers) {
            metrics::counter!("webhooks_rejected_total", "source" => "provider").increment(1);
            tracing::warn!(reason = rejection.as_str(), "provider webhook rejected");
            return Ok(WebhookOutcome::Rejected(rejection));
        }

        let payload = std::str::from_utf8(raw_body)
            .map_err(|e| FulfillmentError::Validation(format!("webhook body is not UTF-8: {e}")))?;
        let notification: ProviderNotification = serde_json::from_str(payload)
            .map_err(|e| FulfillmentError::Validation(format!("malformed webhook body: {e}")))?;

        let log = self
            .coordinator
            .store()
            .append_webhook_log(WebhookSource::Provider, &notification.notify_type, payload)
            .await?;
        metrics::counter!("webhooks_received_total", "source" => "provider").increment(1);

        self.apply(&log, &notification).await?;

        Ok(WebhookOutcome::Accepted {
            log_id: log.id,
            kind: notification.notify_type,
        })
    }

    /// Re-applies provider webhooks left unprocessed, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn replay_unprocessed(&self) -> Result<ReplaySummary> {
        let pending = self
            .coordinator
            .store()
            .list_unprocessed_webhooks(WebhookSource::Provider)
            .await?;

        let mut summary = ReplaySummary::default();
        for log in pending {
            let applied = match serde_json::from_str::<ProviderNotification>(&log.payload) {
                Ok(notification) => self.apply(&log, &notification).await,
                Err(e) => Err(e.into()),
            };
            match applied {
                Ok(()) => summary.replayed += 1,
                Err(err) => {
                    tracing::warn!(log_id = %log.id, error = %err, "webhook replay failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            replayed = summary.replayed,
            failed = summary.failed,
            "webhook replay finished"
        );
        Ok(summary)
    }

    fn authenticate(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
    ) -> std::result::Result<(), Rejection> {
        let Some(secret) = self.auth.secret_key.as_deref() else {
            tracing::warn!("ESIM_SECRET_KEY not set; provider webhook accepted without verification");
            return Ok(());
        };

        let (Some(signature), Some(timestamp), Some(request_id)) = (
            headers.signature.as_deref(),
            headers.timestamp.as_deref(),
            headers.request_id.as_deref(),
        ) else {
            return Err(Rejection::MissingHeaders);
        };

        if signing::verify(
            secret,
            timestamp,
            request_id,
            &self.auth.access_code,
            raw_body,
            signature,
        ) {
            Ok(())
        } else {
            Err(Rejection::InvalidSignature)
        }
    }

    async fn apply(&self, log: &WebhookLog, notification: &ProviderNotification) -> Result<()> {
        if let Err(err) = self.dispatch(notification).await {
            tracing::warn!(
                log_id = %log.id,
                kind = %notification.notify_type,
                error = %err,
                "webhook handler failed; left unprocessed"
            );
            return Err(err);
        }
        self.coordinator
            .store()
            .mark_webhook_processed(log.id)
            .await?;
        Ok(())
    }

    async fn dispatch(&self, notification: &ProviderNotification) -> Result<()> {
        match notification.kind() {
            NotifyType::OrderStatus => self.on_order_status(notification).await,
            NotifyType::DataUsage => self.on_data_usage(notification).await,
            NotifyType::SmdpEvent => self.on_smdp_event(notification).await,
            NotifyType::BalanceAlert => {
                tracing::warn!("provider reported low balance");
                let payload = serde_json::json!({
                    "notifyType": notification.notify_type,
                    "timestamp": notification.timestamp,
                });
                self.coordinator.dispatcher().balance_alert(&payload).await;
                Ok(())
            }
            NotifyType::Unknown => {
                tracing::info!(kind = %notification.notify_type, "ignoring unknown notification type");
                Ok(())
            }
        }
    }

    async fn on_order_status(&self, notification: &ProviderNotification) -> Result<()> {
        let order_no = notification.order_no.as_deref().ok_or_else(|| {
            FulfillmentError::Validation("ORDER_STATUS without orderNo".to_string())
        })?;

        let order = self
            .coordinator
            .store()
            .find_order_by_order_no(order_no)
            .await?
            .ok_or_else(|| FulfillmentError::UnknownOrderNo(order_no.to_string()))?;

        let completed = self.coordinator.sync_profiles(order.id).await?;
        tracing::info!(order_id = %order.id, %order_no, completed, "order status notification applied");
        Ok(())
    }

    async fn on_data_usage(&self, notification: &ProviderNotification) -> Result<()> {
        let esim_tran_no = notification.require_esim_tran_no()?;
        let usage = notification.usage.ok_or_else(|| {
            FulfillmentError::Validation("DATA_USAGE without usage".to_string())
        })?;

        let update = self
            .coordinator
            .dispatcher()
            .record_usage(esim_tran_no, usage.used(), usage.total())
            .await?;
        tracing::debug!(
            %esim_tran_no,
            used = update.profile.used_volume.bytes(),
            triggered = update.triggered.len(),
            "usage recorded"
        );
        Ok(())
    }

    async fn on_smdp_event(&self, notification: &ProviderNotification) -> Result<()> {
        let esim_tran_no = notification.require_esim_tran_no()?;
        let Some(status) = notification
            .event
            .as_deref()
            .and_then(ProfileStatus::from_smdp_event)
        else {
            tracing::debug!(event = ?notification.event, "ignoring unrecognised SM-DP+ event");
            return Ok(());
        };

        let updated = self
            .coordinator
            .store()
            .update_profile_status(esim_tran_no, status)
            .await?;
        if !updated {
            tracing::warn!(%esim_tran_no, %status, "SM-DP+ event for unknown profile");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_report_shapes() {
        let bytes: UsageReport = serde_json::from_str("1024").unwrap();
        assert_eq!(bytes.used().bytes(), 1024);
        assert_eq!(bytes.total(), None);

        let detailed: UsageReport =
            serde_json::from_str(r#"{"usedVolume": 800, "totalVolume": 1000}"#).unwrap();
        assert_eq!(detailed.used().bytes(), 800);
        assert_eq!(detailed.total().map(|t| t.bytes()), Some(1000));

        let aliased: UsageReport = serde_json::from_str(r#"{"dataUsage": 5}"#).unwrap();
        assert_eq!(aliased.used().bytes(), 5);
    }

    #[test]
    fn test_notification_parsing() {
        let notification: ProviderNotification = serde_json::from_str(
            r#"{"notifyType":"SMDP_EVENT","esimTranNo":"T1","event":"DOWNLOAD","timestamp":1700000000}"#,
        )
        .unwrap();
        assert_eq!(notification.kind(), NotifyType::SmdpEvent);
        assert_eq!(notification.esim_tran_no.as_deref(), Some("T1"));
        assert_eq!(NotifyType::parse("SOMETHING_NEW"), NotifyType::Unknown);
    }

    #[test]
    fn test_auth_debug_redacts_secret() {
        let auth = ProviderWebhookAuth {
            access_code: "code".to_string(),
            secret_key: Some("hunter2".to_string()),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
