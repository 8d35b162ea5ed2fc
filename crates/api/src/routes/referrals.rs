//! Referral registration.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::UserId;
use domain::{Money, ReferralReward};
use fulfillment::ProvisioningProvider;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateReferralBody {
    pub referrer_id: String,
    pub referred_id: String,
    /// Credit for the referrer once the referred user's first order completes.
    pub amount_cents: i64,
}

#[derive(Serialize)]
pub struct ReferralResponse {
    pub id: String,
    pub referrer_id: String,
    pub referred_id: String,
    pub amount_cents: i64,
    pub status: &'static str,
    pub order_id: Option<String>,
    pub created_at: String,
}

impl From<&ReferralReward> for ReferralResponse {
    fn from(reward: &ReferralReward) -> Self {
        Self {
            id: reward.id.to_string(),
            referrer_id: reward.referrer_id.to_string(),
            referred_id: reward.referred_id.to_string(),
            amount_cents: reward.amount.cents(),
            status: reward.status.as_str(),
            order_id: reward.order_id.map(|id| id.to_string()),
            created_at: reward.created_at.to_rfc3339(),
        }
    }
}

/// POST /referrals: Record a pending referral reward.
#[tracing::instrument(skip(state, body))]
pub async fn create<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Json(body): Json<CreateReferralBody>,
) -> Result<(StatusCode, Json<ReferralResponse>), ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let referrer_id: UserId = parse_id("referrer_id", &body.referrer_id)?;
    let referred_id: UserId = parse_id("referred_id", &body.referred_id)?;
    if referrer_id == referred_id {
        return Err(ApiError::BadRequest("A user cannot refer themselves".to_string()));
    }
    if body.amount_cents <= 0 {
        return Err(ApiError::BadRequest(format!(
            "amount_cents must be positive: {}",
            body.amount_cents
        )));
    }

    let reward = state
        .coordinator
        .store()
        .create_referral_reward(referrer_id, referred_id, Money::from_cents(body.amount_cents))
        .await?;

    tracing::info!(reward_id = %reward.id, "referral recorded");
    Ok((StatusCode::CREATED, Json((&reward).into())))
}
