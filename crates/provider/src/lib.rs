//! Client for the carrier aggregator's provisioning API.
//!
//! [`SignedClient`] sends HMAC-signed JSON requests and unwraps the
//! `{success, errorCode, errorMsg, obj}` envelope. The [`signing`] module is
//! also used to authenticate webhooks the provider sends back.

pub mod client;
pub mod config;
pub mod error;
pub mod signing;
pub mod types;

pub use client::SignedClient;
pub use config::ProviderConfig;
pub use error::{ProviderError, Result};
pub use types::{
    Balance, Endpoint, Package, PackageList, PackageOrder, PackageQuery, PlaceOrderRequest,
    PlacedOrder, ProfilePage, ProfileQuery, ProfileUsage, ProviderProfile, TopUpRequest,
    TopUpResult, UsageList, WebhookRegistration,
};
