//! Provisioning state machine.
//!
//! Drives an order from checkout through payment, provider order placement
//! and profile polling to completion. Every status change is a guarded
//! store update, so the poll loop and webhook handlers can race freely.

use std::sync::Arc;
use std::time::Instant;

use common::{OrderId, UserId};
use domain::{LineItem, Money, NewOrder, Order, OrderStatus, ProvisionedProfile};
use order_store::OrderStore;
use provider::{PackageOrder, PlaceOrderRequest, PlacedOrder, ProviderProfile};
use serde::{Deserialize, Serialize};

use crate::config::FulfillmentConfig;
use crate::error::{FulfillmentError, Result};
use crate::services::{Notifier, ProvisioningProvider, to_upsert};
use crate::side_effects::SideEffectDispatcher;

/// A purchase request.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub currency: String,
    pub items: Vec<LineItem>,

    /// Account credit to apply. Capped at the order amount.
    #[serde(default)]
    pub credits: Money,
}

/// Result of a checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: Order,

    /// Profiles delivered so far. Empty until the order is provisioned.
    pub profiles: Vec<ProvisionedProfile>,

    /// What the payment processor still has to collect.
    pub amount_due: Money,
}

/// An order together with its profiles.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub profiles: Vec<ProvisionedProfile>,
}

/// Orchestrates order provisioning against the provider.
pub struct ProvisioningCoordinator<S, P> {
    store: S,
    provider: Arc<P>,
    dispatcher: SideEffectDispatcher<S>,
    config: FulfillmentConfig,
}

impl<S: Clone, P> Clone for ProvisioningCoordinator<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            provider: Arc::clone(&self.provider),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, P> ProvisioningCoordinator<S, P>
where
    S: OrderStore + Clone,
    P: ProvisioningProvider,
{
    /// Creates a new coordinator.
    pub fn new(
        store: S,
        provider: P,
        notifier: Arc<dyn Notifier>,
        config: FulfillmentConfig,
    ) -> Self {
        let dispatcher = SideEffectDispatcher::new(store.clone(), config.referral, notifier);
        Self {
            store,
            provider: Arc::new(provider),
            dispatcher,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dispatcher(&self) -> &SideEffectDispatcher<S> {
        &self.dispatcher
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }

    /// Creates an order, reserving the requested credit, and pays and
    /// provisions it before returning when credit covers it in full.
    ///
    /// Otherwise the order stays `PENDING_PAYMENT` and the outcome carries
    /// the amount the payment processor has to collect.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutOutcome> {
        let new_order = NewOrder::new(request.user_id, request.currency, request.items)?
            .with_credits(request.credits)?;

        let order = self.store.create_order(new_order).await?;
        metrics::counter!("orders_checked_out_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            amount = order.amount.cents(),
            credits = order.credits_used.cents(),
            "order created"
        );

        let amount_due = order.amount_due();
        if !amount_due.is_zero() {
            return Ok(CheckoutOutcome {
                order,
                profiles: Vec::new(),
                amount_due,
            });
        }

        self.store.mark_paid(order.id).await?;
        let order = self.provision(order.id).await?;
        let profiles = self.store.list_profiles(order.id).await?;

        Ok(CheckoutOutcome {
            order,
            profiles,
            amount_due,
        })
    }

    /// Applies a payment confirmation and provisions the order.
    ///
    /// Repeated confirmations are no-ops. A confirmation for an order left
    /// `PAID` by an earlier provider outage retries provisioning.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        let order = self.load(order_id).await?;
        if order.user_id != user_id {
            return Err(FulfillmentError::Validation(format!(
                "order {order_id} does not belong to user {user_id}"
            )));
        }

        if order.status == OrderStatus::PendingPayment && self.store.mark_paid(order_id).await? {
            tracing::info!(credits_used = order.credits_used.cents(), "payment confirmed");
        }

        let order = self.load(order_id).await?;
        match order.status {
            OrderStatus::Paid => self.provision(order_id).await,
            OrderStatus::Cancelled | OrderStatus::Failed => {
                tracing::warn!(status = %order.status, "payment confirmed for closed order");
                Ok(order)
            }
            _ => {
                tracing::debug!(status = %order.status, "payment already applied");
                Ok(order)
            }
        }
    }

    /// Places the provider order for a `PAID` order and polls for profiles,
    /// or resumes polling for a `PROCESSING` one.
    ///
    /// Returns the order as it stands when polling ends. An exhausted poll
    /// budget leaves the order `PROCESSING` for the webhook to finish.
    #[tracing::instrument(skip(self))]
    pub async fn provision(&self, order_id: OrderId) -> Result<Order> {
        let order = self.load(order_id).await?;

        let order_no = match order.status {
            OrderStatus::Paid => self.place_order(&order).await?,
            OrderStatus::Processing => match order.order_no.clone() {
                Some(order_no) => order_no,
                None => {
                    return Err(FulfillmentError::InvalidState {
                        order_id,
                        status: order.status,
                        action: "resume polling for",
                    });
                }
            },
            OrderStatus::Completed => return Ok(order),
            status => {
                return Err(FulfillmentError::InvalidState {
                    order_id,
                    status,
                    action: "provision",
                });
            }
        };

        self.poll(order_id, &order_no).await?;
        self.load(order_id).await
    }

    /// Places the provider order and records its order number.
    async fn place_order(&self, order: &Order) -> Result<String> {
        metrics::counter!("provision_attempts_total").increment(1);

        let request = PlaceOrderRequest {
            transaction_id: order.transaction_id.clone(),
            amount: None,
            package_info_list: order
                .items
                .iter()
                .map(|item| PackageOrder {
                    package_code: item.package_code.clone(),
                    count: item.quantity,
                    price: None,
                })
                .collect(),
        };

        let order_no = match self.provider.place_order(&request).await {
            Ok(PlacedOrder {
                order_no: Some(order_no),
                ..
            }) => order_no,
            Ok(_) => {
                return self
                    .fail(order.id, "provider accepted the order without an order number")
                    .await;
            }
            Err(err) if err.code().is_some_and(|code| self.config.is_terminal_code(code)) => {
                return self.fail(order.id, &err.to_string()).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "provider order placement failed; order stays PAID");
                return Err(FulfillmentError::ProviderUnavailable {
                    order_id: order.id,
                    source: err,
                });
            }
        };

        if self.store.mark_processing(order.id, &order_no).await? {
            tracing::info!(order_no = %order_no, "provider order placed");
            return Ok(order_no);
        }

        // A concurrent provision of the same order won the transition. The
        // provider deduplicates by transaction id, so its order number is ours.
        let current = self.load(order.id).await?;
        match (current.status, current.order_no) {
            (OrderStatus::Processing | OrderStatus::Completed, Some(existing)) => Ok(existing),
            (status, _) => Err(FulfillmentError::InvalidState {
                order_id: order.id,
                status,
                action: "record provider order for",
            }),
        }
    }

    /// Fails a rejected order, refunding its credit.
    async fn fail<T>(&self, order_id: OrderId, reason: &str) -> Result<T> {
        if self.store.fail_order(order_id).await? {
            metrics::counter!("orders_failed_total").increment(1);
        }
        tracing::error!(%reason, "provider rejected order");
        Err(FulfillmentError::ProvisioningFailed {
            order_id,
            reason: reason.to_string(),
        })
    }

    /// Polls the provider until profiles appear or the budget runs out.
    ///
    /// Returns true if the order is `COMPLETED` when the loop ends.
    async fn poll(&self, order_id: OrderId, order_no: &str) -> Result<bool> {
        let policy = self.config.poll;
        let started = Instant::now();
        let mut done = false;

        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.interval).await;

            let current = self.load(order_id).await?;
            if current.status != OrderStatus::Processing {
                done = current.status == OrderStatus::Completed;
                tracing::debug!(attempt, status = %current.status, "order left PROCESSING; polling stopped");
                break;
            }

            match self.provider.query_profiles(order_no).await {
                Ok(profiles) if profiles.is_empty() => {
                    tracing::debug!(attempt, %order_no, "profiles not ready");
                }
                Ok(profiles) => match self.complete_with_profiles(order_id, &profiles).await {
                    Ok(_) => {
                        done = true;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(attempt, error = %err, "failed to apply polled profiles");
                    }
                },
                Err(err) => {
                    tracing::warn!(attempt, %order_no, error = %err, "profile query failed");
                }
            }
        }

        metrics::histogram!("poll_duration_seconds").record(started.elapsed().as_secs_f64());
        if !done {
            tracing::warn!(
                attempts = policy.max_attempts,
                %order_no,
                "poll budget exhausted; order stays PROCESSING"
            );
        }
        Ok(done)
    }

    /// Persists provider profiles and completes the order.
    ///
    /// Shared by the poll loop and the webhook handlers. Returns true only
    /// for the call that moved the order to `COMPLETED`; side effects run
    /// for that call alone. An empty profile list changes nothing.
    #[tracing::instrument(skip(self, profiles), fields(profiles = profiles.len()))]
    pub async fn complete_with_profiles(
        &self,
        order_id: OrderId,
        profiles: &[ProviderProfile],
    ) -> Result<bool> {
        if profiles.is_empty() {
            return Ok(false);
        }

        let order = self.load(order_id).await?;
        if !matches!(
            order.status,
            OrderStatus::Processing | OrderStatus::Completed
        ) {
            tracing::warn!(status = %order.status, "ignoring profiles for order not being provisioned");
            return Ok(false);
        }

        let upserts = profiles.iter().map(to_upsert).collect();
        let outcome = self.store.upsert_profiles(order_id, upserts).await?;
        tracing::debug!(inserted = outcome.inserted, "profiles stored");
        self.dispatcher.notify_triggered(&outcome.triggered).await;

        let completion = self.dispatcher.complete_order(order_id).await?;
        Ok(completion.transitioned)
    }

    /// Re-queries the provider for an order's profiles and applies them.
    #[tracing::instrument(skip(self))]
    pub async fn sync_profiles(&self, order_id: OrderId) -> Result<bool> {
        let order = self.load(order_id).await?;
        let Some(order_no) = order.order_no else {
            return Err(FulfillmentError::InvalidState {
                order_id,
                status: order.status,
                action: "sync profiles for",
            });
        };

        let profiles = self
            .provider
            .query_profiles(&order_no)
            .await
            .map_err(|source| FulfillmentError::ProviderUnavailable { order_id, source })?;
        self.complete_with_profiles(order_id, &profiles).await
    }

    /// Cancels an order that has not reached the provider yet, refunding
    /// its reserved credit.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order> {
        let order = self.load(order_id).await?;
        if !order.status.can_cancel() || !self.store.cancel_order(order_id).await? {
            let current = self.load(order_id).await?;
            return Err(FulfillmentError::InvalidState {
                order_id,
                status: current.status,
                action: "cancel",
            });
        }

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(refunded = order.credits_used.cents(), "order cancelled");
        self.load(order_id).await
    }

    /// Returns an order and its profiles.
    pub async fn get_order_details(&self, order_id: OrderId) -> Result<OrderDetails> {
        let order = self.load(order_id).await?;
        let profiles = self.store.list_profiles(order_id).await?;
        Ok(OrderDetails { order, profiles })
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }
}
