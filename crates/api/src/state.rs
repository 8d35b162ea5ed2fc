//! Shared application state.

use std::sync::Arc;

use fulfillment::{
    PaymentWebhookHandler, ProviderWebhookAuth, ProvisioningCoordinator, ProvisioningProvider,
    WebhookReconciler,
};
use order_store::OrderStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S, P> {
    pub coordinator: ProvisioningCoordinator<S, P>,
    pub webhooks: WebhookReconciler<S, P>,
    pub payments: PaymentWebhookHandler<S, P>,
}

impl<S, P> AppState<S, P>
where
    S: OrderStore + Clone,
    P: ProvisioningProvider,
{
    /// Wires both webhook paths to the same coordinator.
    pub fn new(
        coordinator: ProvisioningCoordinator<S, P>,
        webhook_auth: ProviderWebhookAuth,
        payment_secret: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            webhooks: WebhookReconciler::new(coordinator.clone(), webhook_auth),
            payments: PaymentWebhookHandler::new(coordinator.clone(), payment_secret),
            coordinator,
        })
    }
}
