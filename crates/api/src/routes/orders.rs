//! Checkout, order lifecycle and account endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, UserId};
use domain::{DataVolume, DomainError, LineItem, Money, Order, ProvisionedProfile};
use fulfillment::{CheckoutRequest, ProvisioningProvider};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CheckoutBody {
    pub user_id: String,
    pub currency: String,
    pub items: Vec<LineItemBody>,
    #[serde(default)]
    pub credits_cents: i64,
}

#[derive(Deserialize)]
pub struct LineItemBody {
    pub package_code: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    pub volume_bytes: u64,
    pub duration: u32,
    pub duration_unit: String,
    pub location_code: String,
}

impl LineItemBody {
    fn into_line_item(self) -> Result<LineItem, ApiError> {
        Ok(LineItem {
            duration_unit: self
                .duration_unit
                .parse()
                .map_err(|e: DomainError| ApiError::BadRequest(e.to_string()))?,
            package_code: self.package_code,
            name: self.name,
            unit_price: Money::from_cents(self.unit_price_cents),
            quantity: self.quantity,
            volume: DataVolume::from_bytes(self.volume_bytes),
            duration: self.duration,
            location_code: self.location_code,
        })
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub transaction_id: String,
    pub order_no: Option<String>,
    pub user_id: String,
    pub status: &'static str,
    pub amount_cents: i64,
    pub credits_used_cents: i64,
    pub currency: String,
    pub items: Vec<LineItemResponse>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub package_code: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    pub volume_bytes: u64,
    pub duration: u32,
    pub duration_unit: &'static str,
    pub location_code: String,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: String,
    pub esim_tran_no: String,
    pub iccid: String,
    pub qr_code_url: Option<String>,
    pub activation_code: Option<String>,
    pub status: &'static str,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent_used: u8,
    pub expires_at: Option<String>,
    pub activated_at: Option<String>,
}

#[derive(Serialize)]
pub struct OrderDetailsResponse {
    pub order: OrderResponse,
    pub profiles: Vec<ProfileResponse>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    pub profiles: Vec<ProfileResponse>,
    pub amount_due_cents: i64,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub user_id: String,
    pub credit_balance_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            transaction_id: order.transaction_id.clone(),
            order_no: order.order_no.clone(),
            user_id: order.user_id.to_string(),
            status: order.status.as_str(),
            amount_cents: order.amount.cents(),
            credits_used_cents: order.credits_used.cents(),
            currency: order.currency.clone(),
            items: order
                .items
                .iter()
                .map(|item| LineItemResponse {
                    package_code: item.package_code.clone(),
                    name: item.name.clone(),
                    unit_price_cents: item.unit_price.cents(),
                    quantity: item.quantity,
                    volume_bytes: item.volume.bytes(),
                    duration: item.duration,
                    duration_unit: item.duration_unit.as_str(),
                    location_code: item.location_code.clone(),
                })
                .collect(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

impl From<&ProvisionedProfile> for ProfileResponse {
    fn from(profile: &ProvisionedProfile) -> Self {
        Self {
            id: profile.id.to_string(),
            esim_tran_no: profile.esim_tran_no.clone(),
            iccid: profile.iccid.clone(),
            qr_code_url: profile.qr_code_url.clone(),
            activation_code: profile.activation_code.clone(),
            status: profile.status.as_str(),
            used_bytes: profile.used_volume.bytes(),
            total_bytes: profile.total_volume.bytes(),
            percent_used: profile.percent_used(),
            expires_at: profile.expires_at.map(|t| t.to_rfc3339()),
            activated_at: profile.activated_at.map(|t| t.to_rfc3339()),
        }
    }
}

fn details(order: &Order, profiles: &[ProvisionedProfile]) -> OrderDetailsResponse {
    OrderDetailsResponse {
        order: order.into(),
        profiles: profiles.iter().map(ProfileResponse::from).collect(),
    }
}

// -- Handlers --

/// POST /checkout: Create an order, paying it from credit when possible.
#[tracing::instrument(skip(state, body), fields(user_id = %body.user_id))]
pub async fn checkout<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    if body.credits_cents < 0 {
        return Err(ApiError::BadRequest(format!(
            "credits_cents must not be negative: {}",
            body.credits_cents
        )));
    }

    let request = CheckoutRequest {
        user_id: parse_id("user_id", &body.user_id)?,
        currency: body.currency,
        items: body
            .items
            .into_iter()
            .map(LineItemBody::into_line_item)
            .collect::<Result<_, _>>()?,
        credits: Money::from_cents(body.credits_cents),
    };

    let outcome = state.coordinator.checkout(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order: (&outcome.order).into(),
            profiles: outcome.profiles.iter().map(ProfileResponse::from).collect(),
            amount_due_cents: outcome.amount_due.cents(),
        }),
    ))
}

/// GET /orders/{id}: An order and its profiles.
#[tracing::instrument(skip(state))]
pub async fn get<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetailsResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let order_id: OrderId = parse_id("order id", &id)?;
    let found = state.coordinator.get_order_details(order_id).await?;
    Ok(Json(details(&found.order, &found.profiles)))
}

/// POST /orders/{id}/provision: Place or resume provisioning for a paid order.
#[tracing::instrument(skip(state))]
pub async fn provision<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetailsResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let order_id: OrderId = parse_id("order id", &id)?;
    state.coordinator.provision(order_id).await?;
    let found = state.coordinator.get_order_details(order_id).await?;
    Ok(Json(details(&found.order, &found.profiles)))
}

/// POST /orders/{id}/cancel: Cancel an order that has not reached the provider.
#[tracing::instrument(skip(state))]
pub async fn cancel<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let order_id: OrderId = parse_id("order id", &id)?;
    let order = state.coordinator.cancel(order_id).await?;
    Ok(Json((&order).into()))
}

/// GET /users/{user_id}/orders
#[tracing::instrument(skip(state))]
pub async fn list_for_user<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let user_id: UserId = parse_id("user id", &user_id)?;
    let orders = state.coordinator.store().list_orders_for_user(user_id).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /users/{user_id}/account
#[tracing::instrument(skip(state))]
pub async fn account<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    Path(user_id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    P: ProvisioningProvider + 'static,
{
    let user_id: UserId = parse_id("user id", &user_id)?;
    let account = state.coordinator.store().get_account(user_id).await?;
    Ok(Json(AccountResponse {
        user_id: account.user_id.to_string(),
        credit_balance_cents: account.credit_balance.cents(),
    }))
}
