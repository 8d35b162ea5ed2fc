use async_trait::async_trait;
use common::{OrderId, ProfileId, UserId, WebhookLogId};
use domain::{
    Account, DataVolume, Money, NewOrder, NewUsageAlert, Order, OrderStatus, ProfileStatus,
    ProfileUpsert, ProvisionedProfile, ReferralReward, ReferralTerms, TriggeredAlert, UsageAlert,
    WebhookLog, WebhookSource,
};

use crate::Result;

/// Result of [`OrderStore::upsert_profiles`].
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    /// Profiles as stored after the upsert, in input order.
    pub profiles: Vec<ProvisionedProfile>,

    /// How many rows were newly created (the rest were overwritten).
    pub inserted: usize,

    /// Alerts that fired because of the usage carried by the upsert.
    pub triggered: Vec<TriggeredAlert>,
}

/// Result of [`OrderStore::complete_order`].
#[derive(Debug, Clone)]
pub struct Completion {
    /// True only for the caller whose guarded update moved the order to
    /// `COMPLETED`. Every other caller sees `false`.
    pub transitioned: bool,

    /// The order as it is after the call.
    pub order: Order,

    /// The referral reward credited by this completion, if any.
    pub referral: Option<ReferralReward>,
}

/// Result of [`OrderStore::record_usage`].
#[derive(Debug, Clone)]
pub struct UsageUpdate {
    pub profile: ProvisionedProfile,

    /// Alerts that fired in this update. Each alert appears here at most once
    /// over its lifetime.
    pub triggered: Vec<TriggeredAlert>,
}

/// Repository contract for the fulfillment core.
///
/// Implementations must make every method atomic: a concurrent caller either
/// sees the whole effect of a call or none of it.
#[async_trait]
pub trait OrderStore: Send + Sync {
    // -- Orders --

    /// Inserts a new order in `PENDING_PAYMENT` together with its line items,
    /// debiting `order.credits` from the owner's account in the same
    /// transaction.
    ///
    /// Fails with `InsufficientCredit` and stores nothing if the balance
    /// does not cover the credit.
    async fn create_order(&self, order: NewOrder) -> Result<Order>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Looks an order up by its provider-assigned order number.
    async fn find_order_by_order_no(&self, order_no: &str) -> Result<Option<Order>>;

    /// Looks an order up by its external transaction id.
    async fn find_order_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Moves an order from `from` to `to` only if it is currently in `from`.
    ///
    /// Returns `false` when the order is in any other status. Illegal
    /// transitions are rejected with a domain error before touching storage.
    async fn transition_status(&self, id: OrderId, from: OrderStatus, to: OrderStatus)
    -> Result<bool>;

    /// Moves `PENDING_PAYMENT -> PAID`. The credit was taken at creation,
    /// so nothing is debited here.
    ///
    /// Returns `false` if the order already left `PENDING_PAYMENT`.
    async fn mark_paid(&self, id: OrderId) -> Result<bool>;

    /// Moves `PAID -> PROCESSING` and records the provider order number.
    ///
    /// Returns `false` if the order is not `PAID` or already has an order number.
    async fn mark_processing(&self, id: OrderId, order_no: &str) -> Result<bool>;

    /// Moves `PENDING_PAYMENT | PAID -> CANCELLED`. The order's credit is
    /// refunded in the same transaction.
    ///
    /// Returns `false` if the order is in any other status.
    async fn cancel_order(&self, id: OrderId) -> Result<bool>;

    /// Moves `PAID | PROCESSING -> FAILED`. The order's credit is refunded
    /// in the same transaction.
    ///
    /// Returns `false` if the order is in any other status.
    async fn fail_order(&self, id: OrderId) -> Result<bool>;

    /// Moves `PROCESSING -> COMPLETED`. When this call performs the
    /// transition and the user has no other completed order, a pending
    /// referral reward is credited in the same transaction.
    async fn complete_order(&self, id: OrderId, terms: &ReferralTerms) -> Result<Completion>;

    // -- Profiles --

    /// Inserts or overwrites profiles keyed by `esim_tran_no`, evaluating
    /// usage alerts of each touched profile in the same update.
    async fn upsert_profiles(
        &self,
        order_id: OrderId,
        profiles: Vec<ProfileUpsert>,
    ) -> Result<UpsertOutcome>;

    async fn list_profiles(&self, order_id: OrderId) -> Result<Vec<ProvisionedProfile>>;

    async fn get_profile(&self, esim_tran_no: &str) -> Result<Option<ProvisionedProfile>>;

    /// Overwrites usage with the provider-reported values and atomically
    /// fires every untriggered alert whose threshold is now reached.
    async fn record_usage(
        &self,
        esim_tran_no: &str,
        used: DataVolume,
        total: Option<DataVolume>,
    ) -> Result<UsageUpdate>;

    /// Sets the carrier status of a profile. Returns `false` if unknown.
    async fn update_profile_status(&self, esim_tran_no: &str, status: ProfileStatus)
    -> Result<bool>;

    // -- Usage alerts --

    async fn create_usage_alert(&self, alert: NewUsageAlert) -> Result<UsageAlert>;

    async fn list_usage_alerts(&self, profile_id: ProfileId) -> Result<Vec<UsageAlert>>;

    // -- Referrals --

    /// Records a pending reward. A referred user can hold only one pending reward.
    async fn create_referral_reward(
        &self,
        referrer_id: UserId,
        referred_id: UserId,
        amount: Money,
    ) -> Result<ReferralReward>;

    /// Returns the most recent reward for a referred user.
    async fn find_referral_reward(&self, referred_id: UserId) -> Result<Option<ReferralReward>>;

    // -- Accounts --

    /// Returns the user's account, empty if none is stored.
    async fn get_account(&self, user_id: UserId) -> Result<Account>;

    /// Adds `delta` (may be negative) to the user's balance. A balance may
    /// never go below zero.
    async fn adjust_credit(&self, user_id: UserId, delta: Money) -> Result<Account>;

    // -- Webhook audit log --

    async fn append_webhook_log(
        &self,
        source: WebhookSource,
        kind: &str,
        payload: &str,
    ) -> Result<WebhookLog>;

    async fn mark_webhook_processed(&self, id: WebhookLogId) -> Result<()>;

    /// Lists unprocessed entries from `source`, oldest first.
    async fn list_unprocessed_webhooks(&self, source: WebhookSource) -> Result<Vec<WebhookLog>>;
}
