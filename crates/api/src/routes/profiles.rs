//! Profile lookup and usage alert endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{AlertChannels, NewUsageAlert, ProvisionedProfile, UsageAlert};
use fulfillment::ProvisioningProvider;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use super::orders::ProfileResponse;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateAlertBody {
    /// Whole percentage, 1 to 100.
    pub threshold: u8,
    #[serde(default)]
    pub channels: Option<AlertChannels>,
}

#[derive(Serialize)]
pub struct AlertResponse {
    pub id: String,
    pub profile_id: String,
    pub threshold: u8,
    pub email: bool,
    pub push: bool,
    pub triggered: bool,
    pub triggered_at: Option<String>,
}

impl From<&UsageAlert> for AlertResponse {
    fn from(alert: &UsageAlert) -> Self {
        Self {
            id: alert.id.to_string(),
            profile_id: alert.profile_id.to_string(),
            threshold: alert.threshold,
            email: alert.channels.email,
            push: alert.channels.push,
            triggered: alert.triggered,
            triggered_at: alert.triggered_at.map(|t| t.to_rfc3339()),
        }
    }
}

async fn load_profile<S: OrderStore>(
    store: &S,
    esim_tran_no: &str,
) -> Result<ProvisionedProfile, ApiError> {
    store
        .get_profile(esim_tran_no)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Profile {esim_tran_no} not found")))
}

/// GET /profiles/{esim_tran_no}
#[tracing::instrument(skip(state))]
pub async fn get<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(esim_tran_no): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let profile = load_profile(state.coordinator.store(), &esim_tran_no).await?;
    Ok(Json((&profile).into()))
}

/// POST /profiles/{esim_tran_no}/alerts: Watch a profile's data consumption.
#[tracing::instrument(skip(state, body), fields(threshold = body.threshold))]
pub async fn create_alert<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(esim_tran_no): Path<String>,
    Json(body): Json<CreateAlertBody>,
) -> Result<(StatusCode, Json<AlertResponse>), ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let store = state.coordinator.store();
    let profile = load_profile(store, &esim_tran_no).await?;
    let new = NewUsageAlert::new(profile.id, body.threshold, body.channels.unwrap_or_default())?;
    let alert = store.create_usage_alert(new).await?;

    tracing::info!(alert_id = %alert.id, "usage alert created");
    Ok((StatusCode::CREATED, Json((&alert).into())))
}

/// GET /profiles/{esim_tran_no}/alerts
#[tracing::instrument(skip(state))]
pub async fn list_alerts<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(esim_tran_no): Path<String>,
) -> Result<Json<Vec<AlertResponse>>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let store = state.coordinator.store();
    let profile = load_profile(store, &esim_tran_no).await?;
    let alerts = store.list_usage_alerts(profile.id).await?;
    Ok(Json(alerts.iter().map(AlertResponse::from).collect()))
}
