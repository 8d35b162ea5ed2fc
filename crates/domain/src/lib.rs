//! Domain model for the eSIM order fulfillment service.
//!
//! This crate provides the types shared by the store, the provisioning
//! state machine and the HTTP layer:
//! - Order lifecycle state machine and line items
//! - Provisioned eSIM profiles and carrier status
//! - Usage alerts with exact integer threshold math
//! - Referral rewards and account credit

pub mod account;
pub mod alert;
pub mod error;
pub mod money;
pub mod order;
pub mod profile;
pub mod referral;
pub mod volume;
pub mod webhook;

pub use account::Account;
pub use alert::{AlertChannels, NewUsageAlert, TriggeredAlert, UsageAlert};
pub use error::DomainError;
pub use money::Money;
pub use order::{DurationUnit, LineItem, NewOrder, Order, OrderStatus};
pub use profile::{ProfileStatus, ProfileUpsert, ProvisionedProfile};
pub use referral::{ReferralReward, ReferralTerms, RewardStatus};
pub use volume::DataVolume;
pub use webhook::{WebhookLog, WebhookSource};
