//! eSIM order fulfillment.
//!
//! This crate provides:
//! - [`ProvisioningCoordinator`]: the order state machine, from checkout to
//!   provider order placement, polling and completion
//! - [`WebhookReconciler`]: authenticated intake of provider notifications
//! - [`PaymentWebhookHandler`]: payment processor events
//! - [`SideEffectDispatcher`]: notifications and metrics for committed changes
//!
//! The poll loop and the webhook paths race freely. Both converge through
//! [`ProvisioningCoordinator::complete_with_profiles`], which relies on the
//! store's unique profile key and guarded status updates.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod payment;
pub mod services;
pub mod side_effects;
pub mod webhook;

pub use config::{FulfillmentConfig, PollPolicy};
pub use coordinator::{CheckoutOutcome, CheckoutRequest, OrderDetails, ProvisioningCoordinator};
pub use error::{FulfillmentError, Result};
pub use payment::PaymentWebhookHandler;
pub use services::{
    InMemoryNotifier, InMemoryProvider, Notification, Notifier, ProvisioningProvider,
    TracingNotifier,
};
pub use side_effects::SideEffectDispatcher;
pub use webhook::{
    ProviderNotification, ProviderWebhookAuth, Rejection, ReplaySummary, WebhookHeaders,
    WebhookOutcome, WebhookReconciler,
};
