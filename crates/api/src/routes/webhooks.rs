//! Provider and payment webhook intake, plus replay of unprocessed entries.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use fulfillment::payment::SIGNATURE_HEADER as PAYMENT_SIGNATURE_HEADER;
use fulfillment::{ProvisioningProvider, ReplaySummary, WebhookHeaders, WebhookOutcome};
use order_store::OrderStore;
use provider::signing::{REQUEST_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub log_id: String,
    pub kind: String,
}

#[derive(Serialize)]
pub struct ReplayResponse {
    pub provider: ReplaySummary,
    pub payment: ReplaySummary,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

fn acknowledge(outcome: WebhookOutcome) -> Result<Json<WebhookAck>, ApiError> {
    match outcome {
        WebhookOutcome::Accepted { log_id, kind } => Ok(Json(WebhookAck {
            received: true,
            log_id: log_id.to_string(),
            kind,
        })),
        WebhookOutcome::Rejected(rejection) => {
            Err(ApiError::Unauthorized(rejection.as_str().to_string()))
        }
    }
}

/// POST /webhooks/esim: Provider notifications. The raw body is needed
/// for the signature check.
#[tracing::instrument(skip_all)]
pub async fn provider<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let webhook_headers = WebhookHeaders {
        signature: header(&headers, SIGNATURE_HEADER),
        timestamp: header(&headers, TIMESTAMP_HEADER),
        request_id: header(&headers, REQUEST_ID_HEADER),
    };
    let outcome = state.webhooks.ingest(&body, &webhook_headers).await?;
    acknowledge(outcome)
}

/// POST /webhooks/payment: Payment processor events.
#[tracing::instrument(skip_all)]
pub async fn payment<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let signature = header(&headers, PAYMENT_SIGNATURE_HEADER);
    let outcome = state.payments.ingest(&body, signature.as_deref()).await?;
    acknowledge(outcome)
}

/// POST /admin/webhooks/replay: Re-apply logged webhooks that never
/// finished processing.
#[tracing::instrument(skip(state))]
pub async fn replay<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
) -> Result<Json<ReplayResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let provider = state.webhooks.replay_unprocessed().await?;
    let payment = state.payments.replay_unprocessed().await?;
    Ok(Json(ReplayResponse { provider, payment }))
}
