//! Shared identifier types for the eSIM fulfillment service.

mod ids;

pub use ids::{AlertId, OrderId, ProfileId, RewardId, UserId, WebhookLogId};
