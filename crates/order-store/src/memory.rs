use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AlertId, OrderId, ProfileId, RewardId, UserId, WebhookLogId};
use domain::{
    Account, DataVolume, DomainError, Money, NewOrder, NewUsageAlert, Order, OrderStatus,
    ProfileStatus, ProfileUpsert, ProvisionedProfile, ReferralReward, ReferralTerms,
    RewardStatus, TriggeredAlert, UsageAlert, WebhookLog, WebhookSource,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{Completion, OrderStore, UpsertOutcome, UsageUpdate},
};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    /// Keyed by `esim_tran_no`, the upsert key.
    profiles: HashMap<String, ProvisionedProfile>,
    alerts: HashMap<AlertId, UsageAlert>,
    rewards: HashMap<RewardId, ReferralReward>,
    accounts: HashMap<UserId, Money>,
    webhooks: Vec<WebhookLog>,
}

/// In-memory order store for tests and local development.
///
/// All state sits behind one lock, so every trait method is trivially
/// atomic, mirroring the transactional guarantees of the PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the total number of profile rows stored.
    pub async fn profile_count(&self) -> usize {
        self.state.read().await.profiles.len()
    }

    /// Returns every webhook log entry, oldest first.
    pub async fn webhook_logs(&self) -> Vec<WebhookLog> {
        self.state.read().await.webhooks.clone()
    }

    /// Moves an order to `to` if that transition is legal from its current
    /// status, returning its credit to the owner.
    async fn close_with_refund(&self, id: OrderId, to: OrderStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        let State {
            orders, accounts, ..
        } = &mut *state;

        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        if !order.status.can_transition_to(to) {
            return Ok(false);
        }
        if order.credits_used.is_positive() {
            credit(accounts, order.user_id, order.credits_used);
        }
        order.status = to;
        order.updated_at = Utc::now();
        Ok(true)
    }
}

/// Fires every untriggered alert of `profile` that its usage now reaches.
fn fire_alerts(
    alerts: &mut HashMap<AlertId, UsageAlert>,
    profile: &ProvisionedProfile,
    now: DateTime<Utc>,
) -> Vec<TriggeredAlert> {
    let mut fired: Vec<TriggeredAlert> = alerts
        .values_mut()
        .filter(|a| a.profile_id == profile.id)
        .filter(|a| a.should_fire(profile.used_volume, profile.total_volume))
        .map(|alert| {
            alert.fire(now);
            TriggeredAlert {
                alert: alert.clone(),
                profile: profile.clone(),
                percent_used: profile.percent_used(),
            }
        })
        .collect();
    fired.sort_by_key(|t| t.alert.threshold);
    fired
}

fn credit(accounts: &mut HashMap<UserId, Money>, user_id: UserId, amount: Money) {
    *accounts.entry(user_id).or_default() += amount;
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;

        if state
            .orders
            .values()
            .any(|o| o.transaction_id == order.transaction_id)
        {
            return Err(StoreError::Conflict(format!(
                "transaction id {} already used",
                order.transaction_id
            )));
        }

        if order.credits.is_negative() || order.credits > order.amount {
            return Err(DomainError::InvalidCredit(order.credits.cents()).into());
        }
        if order.credits.is_positive() {
            let balance = state.accounts.entry(order.user_id).or_default();
            if *balance < order.credits {
                return Err(StoreError::InsufficientCredit {
                    user_id: order.user_id,
                    balance: *balance,
                    required: order.credits,
                });
            }
            *balance -= order.credits;
        }

        let order = Order::from_new(order, Utc::now());
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_order_no(&self, order_no: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.order_no.as_deref() == Some(order_no))
            .cloned())
    }

    async fn find_order_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.transaction_id == transaction_id)
            .cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        from.ensure_transition(to)?;

        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;

        if order.status != from {
            return Ok(false);
        }
        order.status = to;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_paid(&self, id: OrderId) -> Result<bool> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;

        if order.status != OrderStatus::PendingPayment {
            return Ok(false);
        }
        order.status = OrderStatus::Paid;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_processing(&self, id: OrderId, order_no: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::OrderNotFound(id))?;

        if order.status != OrderStatus::Paid || order.order_no.is_some() {
            return Ok(false);
        }
        order.status = OrderStatus::Processing;
        order.order_no = Some(order_no.to_string());
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn cancel_order(&self, id: OrderId) -> Result<bool> {
        self.close_with_refund(id, OrderStatus::Cancelled).await
    }

    async fn fail_order(&self, id: OrderId) -> Result<bool> {
        self.close_with_refund(id, OrderStatus::Failed).await
    }

    async fn complete_order(&self, id: OrderId, terms: &ReferralTerms) -> Result<Completion> {
        let mut state = self.state.write().await;
        let State {
            orders,
            rewards,
            accounts,
            ..
        } = &mut *state;
        let now = Utc::now();

        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        if order.status != OrderStatus::Processing {
            return Ok(Completion {
                transitioned: false,
                order: order.clone(),
                referral: None,
            });
        }
        order.status = OrderStatus::Completed;
        order.updated_at = now;
        let completed = order.clone();

        let prior_completed = orders
            .values()
            .filter(|o| o.user_id == completed.user_id && o.id != id)
            .filter(|o| o.status == OrderStatus::Completed)
            .count();

        let mut referral = None;
        if prior_completed == 0
            && let Some(reward) = rewards
                .values_mut()
                .find(|r| r.referred_id == completed.user_id && r.status == RewardStatus::Pending)
        {
            reward.credit(id, now);
            credit(accounts, reward.referrer_id, reward.amount);
            credit(accounts, reward.referred_id, terms.welcome_bonus);
            referral = Some(reward.clone());
        }

        Ok(Completion {
            transitioned: true,
            order: completed,
            referral,
        })
    }

    async fn upsert_profiles(
        &self,
        order_id: OrderId,
        profiles: Vec<ProfileUpsert>,
    ) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;
        if !state.orders.contains_key(&order_id) {
            return Err(StoreError::OrderNotFound(order_id));
        }

        // Validate first so a conflicting row leaves nothing half-written.
        for upsert in &profiles {
            if let Some(existing) = state.profiles.get(&upsert.esim_tran_no)
                && existing.order_id != order_id
            {
                return Err(StoreError::Conflict(format!(
                    "profile {} belongs to order {}",
                    upsert.esim_tran_no, existing.order_id
                )));
            }
        }

        let State {
            profiles: stored,
            alerts,
            ..
        } = &mut *state;
        let now = Utc::now();
        let mut outcome = UpsertOutcome::default();

        for upsert in profiles {
            let profile = match stored.get_mut(&upsert.esim_tran_no) {
                Some(existing) => {
                    existing.apply_upsert(upsert, now);
                    existing.clone()
                }
                None => {
                    let profile = ProvisionedProfile::from_upsert(order_id, upsert, now);
                    stored.insert(profile.esim_tran_no.clone(), profile.clone());
                    outcome.inserted += 1;
                    profile
                }
            };
            outcome.triggered.extend(fire_alerts(alerts, &profile, now));
            outcome.profiles.push(profile);
        }

        Ok(outcome)
    }

    async fn list_profiles(&self, order_id: OrderId) -> Result<Vec<ProvisionedProfile>> {
        let state = self.state.read().await;
        let mut profiles: Vec<_> = state
            .profiles
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        profiles.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.esim_tran_no.cmp(&b.esim_tran_no))
        });
        Ok(profiles)
    }

    async fn get_profile(&self, esim_tran_no: &str) -> Result<Option<ProvisionedProfile>> {
        Ok(self.state.read().await.profiles.get(esim_tran_no).cloned())
    }

    async fn record_usage(
        &self,
        esim_tran_no: &str,
        used: DataVolume,
        total: Option<DataVolume>,
    ) -> Result<UsageUpdate> {
        let mut state = self.state.write().await;
        let State {
            profiles, alerts, ..
        } = &mut *state;
        let now = Utc::now();

        let profile = profiles
            .get_mut(esim_tran_no)
            .ok_or_else(|| StoreError::ProfileNotFound(esim_tran_no.to_string()))?;
        profile.used_volume = used;
        if let Some(total) = total {
            profile.total_volume = total;
        }
        profile.updated_at = now;
        let profile = profile.clone();

        let triggered = fire_alerts(alerts, &profile, now);
        Ok(UsageUpdate { profile, triggered })
    }

    async fn update_profile_status(
        &self,
        esim_tran_no: &str,
        status: ProfileStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.profiles.get_mut(esim_tran_no) {
            Some(profile) => {
                profile.status = status;
                profile.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_usage_alert(&self, alert: NewUsageAlert) -> Result<UsageAlert> {
        let mut state = self.state.write().await;
        if !state.profiles.values().any(|p| p.id == alert.profile_id) {
            return Err(StoreError::ProfileNotFound(alert.profile_id.to_string()));
        }
        let alert = UsageAlert::from_new(alert, Utc::now());
        state.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn list_usage_alerts(&self, profile_id: ProfileId) -> Result<Vec<UsageAlert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<_> = state
            .alerts
            .values()
            .filter(|a| a.profile_id == profile_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.threshold);
        Ok(alerts)
    }

    async fn create_referral_reward(
        &self,
        referrer_id: UserId,
        referred_id: UserId,
        amount: Money,
    ) -> Result<ReferralReward> {
        if referrer_id == referred_id {
            return Err(StoreError::Conflict("user cannot refer themselves".to_string()));
        }

        let mut state = self.state.write().await;
        if state
            .rewards
            .values()
            .any(|r| r.referred_id == referred_id && r.status == RewardStatus::Pending)
        {
            return Err(StoreError::Conflict(format!(
                "user {referred_id} already has a pending referral reward"
            )));
        }

        let reward = ReferralReward::pending(referrer_id, referred_id, amount, Utc::now());
        state.rewards.insert(reward.id, reward.clone());
        Ok(reward)
    }

    async fn find_referral_reward(&self, referred_id: UserId) -> Result<Option<ReferralReward>> {
        let state = self.state.read().await;
        Ok(state
            .rewards
            .values()
            .filter(|r| r.referred_id == referred_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn get_account(&self, user_id: UserId) -> Result<Account> {
        let state = self.state.read().await;
        Ok(Account {
            user_id,
            credit_balance: state.accounts.get(&user_id).copied().unwrap_or_default(),
        })
    }

    async fn adjust_credit(&self, user_id: UserId, delta: Money) -> Result<Account> {
        let mut state = self.state.write().await;
        let balance = state.accounts.entry(user_id).or_default();
        let updated = *balance + delta;
        if updated.is_negative() {
            return Err(StoreError::InsufficientCredit {
                user_id,
                balance: *balance,
                required: -delta,
            });
        }
        *balance = updated;
        Ok(Account {
            user_id,
            credit_balance: updated,
        })
    }

    async fn append_webhook_log(
        &self,
        source: WebhookSource,
        kind: &str,
        payload: &str,
    ) -> Result<WebhookLog> {
        let log = WebhookLog::received(source, kind, payload, Utc::now());
        self.state.write().await.webhooks.push(log.clone());
        Ok(log)
    }

    async fn mark_webhook_processed(&self, id: WebhookLogId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(log) = state.webhooks.iter_mut().find(|l| l.id == id) {
            log.processed = true;
            log.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_unprocessed_webhooks(&self, source: WebhookSource) -> Result<Vec<WebhookLog>> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .iter()
            .filter(|l| l.source == source && !l.processed)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{AlertChannels, DurationUnit, LineItem};

    fn new_order(user_id: UserId) -> NewOrder {
        NewOrder::new(
            user_id,
            "USD",
            vec![LineItem {
                package_code: "JP-5GB-30D".to_string(),
                name: "Japan 5GB 30 Days".to_string(),
                unit_price: Money::from_cents(700),
                quantity: 1,
                volume: DataVolume::from_gib(5),
                duration: 30,
                duration_unit: DurationUnit::Day,
                location_code: "JP".to_string(),
            }],
        )
        .unwrap()
    }

    fn profile(tran_no: &str, used: u64) -> ProfileUpsert {
        ProfileUpsert {
            esim_tran_no: tran_no.to_string(),
            iccid: format!("8985{tran_no}"),
            qr_code_url: None,
            activation_code: Some(format!("LPA:1$smdp.example${tran_no}")),
            status: ProfileStatus::GotResource,
            used_volume: DataVolume::from_bytes(used),
            total_volume: DataVolume::from_bytes(1000),
            expires_at: None,
            activated_at: None,
        }
    }

    async fn processing_order(store: &InMemoryOrderStore, user_id: UserId) -> Order {
        let order = store.create_order(new_order(user_id)).await.unwrap();
        assert!(store.mark_paid(order.id).await.unwrap());
        let order_no = format!("B{}", order.id.as_uuid().simple());
        assert!(store.mark_processing(order.id, &order_no).await.unwrap());
        store.get_order(order.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn create_and_find_order() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        let order = store.create_order(new_order(user_id)).await.unwrap();

        assert_eq!(order.status, OrderStatus::PendingPayment);
        let found = store
            .find_order_by_transaction_id(&order.transaction_id)
            .await
            .unwrap();
        assert_eq!(found, Some(order.clone()));
        assert_eq!(store.list_orders_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_order_reserves_credit() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        store
            .adjust_credit(user_id, Money::from_cents(1000))
            .await
            .unwrap();
        let new = new_order(user_id).with_credits(Money::from_cents(700)).unwrap();
        let order = store.create_order(new).await.unwrap();

        assert_eq!(order.credits_used.cents(), 700);
        assert_eq!(
            store.get_account(user_id).await.unwrap().credit_balance.cents(),
            300
        );

        assert!(store.mark_paid(order.id).await.unwrap());
        assert!(!store.mark_paid(order.id).await.unwrap());
        let account = store.get_account(user_id).await.unwrap();
        assert_eq!(account.credit_balance.cents(), 300);
    }

    #[tokio::test]
    async fn create_order_with_insufficient_credit_stores_nothing() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        store
            .adjust_credit(user_id, Money::from_cents(100))
            .await
            .unwrap();
        let new = new_order(user_id).with_credits(Money::from_cents(700)).unwrap();

        let result = store.create_order(new).await;
        assert!(matches!(result, Err(StoreError::InsufficientCredit { .. })));

        assert_eq!(store.order_count().await, 0);
        assert_eq!(
            store.get_account(user_id).await.unwrap().credit_balance.cents(),
            100
        );
    }

    #[tokio::test]
    async fn reserved_credit_cannot_be_spent_twice() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        store
            .adjust_credit(user_id, Money::from_cents(200))
            .await
            .unwrap();
        let first = new_order(user_id).with_credits(Money::from_cents(200)).unwrap();
        let order = store.create_order(first).await.unwrap();

        let second = new_order(user_id).with_credits(Money::from_cents(200)).unwrap();
        let result = store.create_order(second).await;
        assert!(matches!(result, Err(StoreError::InsufficientCredit { .. })));

        // Payment for the first order still goes through.
        assert!(store.mark_paid(order.id).await.unwrap());
        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.credits_used.cents(), 200);
    }

    #[tokio::test]
    async fn mark_processing_sets_order_no_once() {
        let store = InMemoryOrderStore::new();
        let order = processing_order(&store, UserId::new()).await;
        let original = order.order_no.clone().unwrap();

        assert!(!store.mark_processing(order.id, "OTHER").await.unwrap());
        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.order_no.as_deref(), Some(original.as_str()));
        assert_eq!(
            store.find_order_by_order_no(&original).await.unwrap().map(|o| o.id),
            Some(order.id)
        );
    }

    #[tokio::test]
    async fn transition_status_is_guarded() {
        let store = InMemoryOrderStore::new();
        let order = store.create_order(new_order(UserId::new())).await.unwrap();

        let illegal = store
            .transition_status(order.id, OrderStatus::PendingPayment, OrderStatus::Completed)
            .await;
        assert!(matches!(illegal, Err(StoreError::Domain(_))));

        assert!(
            !store
                .transition_status(order.id, OrderStatus::Paid, OrderStatus::Cancelled)
                .await
                .unwrap()
        );
        assert!(
            store
                .transition_status(order.id, OrderStatus::PendingPayment, OrderStatus::Cancelled)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn cancel_paid_order_refunds_credit() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        store
            .adjust_credit(user_id, Money::from_cents(700))
            .await
            .unwrap();
        let new = new_order(user_id).with_credits(Money::from_cents(700)).unwrap();
        let order = store.create_order(new).await.unwrap();
        assert!(store.mark_paid(order.id).await.unwrap());

        assert!(store.cancel_order(order.id).await.unwrap());
        assert!(!store.cancel_order(order.id).await.unwrap());
        assert_eq!(
            store.get_account(user_id).await.unwrap().credit_balance.cents(),
            700
        );
    }

    #[tokio::test]
    async fn cancel_pending_order_releases_reservation() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        store
            .adjust_credit(user_id, Money::from_cents(200))
            .await
            .unwrap();
        let new = new_order(user_id).with_credits(Money::from_cents(200)).unwrap();
        let order = store.create_order(new).await.unwrap();

        assert!(store.cancel_order(order.id).await.unwrap());
        assert_eq!(
            store.get_account(user_id).await.unwrap().credit_balance.cents(),
            200
        );
    }

    #[tokio::test]
    async fn fail_order_refunds_credit_once() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        store
            .adjust_credit(user_id, Money::from_cents(700))
            .await
            .unwrap();
        let new = new_order(user_id).with_credits(Money::from_cents(700)).unwrap();
        let order = store.create_order(new).await.unwrap();

        assert!(!store.fail_order(order.id).await.unwrap());
        assert!(store.mark_paid(order.id).await.unwrap());
        assert!(store.fail_order(order.id).await.unwrap());
        assert!(!store.fail_order(order.id).await.unwrap());

        assert_eq!(
            store.get_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Failed
        );
        assert_eq!(
            store.get_account(user_id).await.unwrap().credit_balance.cents(),
            700
        );
    }

    #[tokio::test]
    async fn cancel_refuses_processing_order() {
        let store = InMemoryOrderStore::new();
        let order = processing_order(&store, UserId::new()).await;
        assert!(!store.cancel_order(order.id).await.unwrap());
        assert_eq!(
            store.get_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Processing
        );
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_tran_no() {
        let store = InMemoryOrderStore::new();
        let order = processing_order(&store, UserId::new()).await;

        let first = store
            .upsert_profiles(order.id, vec![profile("T1", 0), profile("T2", 0)])
            .await
            .unwrap();
        assert_eq!(first.inserted, 2);

        let second = store
            .upsert_profiles(order.id, vec![profile("T1", 42)])
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.profiles[0].id, first.profiles[0].id);
        assert_eq!(store.profile_count().await, 2);
        assert_eq!(
            store.get_profile("T1").await.unwrap().unwrap().used_volume.bytes(),
            42
        );
    }

    #[tokio::test]
    async fn upsert_rejects_profile_owned_by_other_order() {
        let store = InMemoryOrderStore::new();
        let a = processing_order(&store, UserId::new()).await;
        let b = processing_order(&store, UserId::new()).await;

        store
            .upsert_profiles(a.id, vec![profile("T1", 0)])
            .await
            .unwrap();
        let result = store.upsert_profiles(b.id, vec![profile("T1", 0)]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn complete_order_transitions_once() {
        let store = InMemoryOrderStore::new();
        let order = processing_order(&store, UserId::new()).await;
        let terms = ReferralTerms::default();

        let first = store.complete_order(order.id, &terms).await.unwrap();
        let second = store.complete_order(order.id, &terms).await.unwrap();

        assert!(first.transitioned);
        assert!(!second.transitioned);
        assert_eq!(second.order.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn first_completion_credits_referral() {
        let store = InMemoryOrderStore::new();
        let referrer = UserId::new();
        let referred = UserId::new();
        store
            .create_referral_reward(referrer, referred, Money::from_cents(500))
            .await
            .unwrap();
        let terms = ReferralTerms {
            welcome_bonus: Money::from_cents(300),
        };

        let first = processing_order(&store, referred).await;
        let completion = store.complete_order(first.id, &terms).await.unwrap();
        let reward = completion.referral.unwrap();
        assert_eq!(reward.status, RewardStatus::Credited);
        assert_eq!(reward.order_id, Some(first.id));

        let second = processing_order(&store, referred).await;
        let completion = store.complete_order(second.id, &terms).await.unwrap();
        assert!(completion.referral.is_none());

        assert_eq!(
            store.get_account(referrer).await.unwrap().credit_balance.cents(),
            500
        );
        assert_eq!(
            store.get_account(referred).await.unwrap().credit_balance.cents(),
            300
        );
    }

    #[tokio::test]
    async fn second_pending_referral_is_rejected() {
        let store = InMemoryOrderStore::new();
        let referred = UserId::new();
        store
            .create_referral_reward(UserId::new(), referred, Money::from_cents(500))
            .await
            .unwrap();
        let result = store
            .create_referral_reward(UserId::new(), referred, Money::from_cents(500))
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn record_usage_fires_alert_once() {
        let store = InMemoryOrderStore::new();
        let order = processing_order(&store, UserId::new()).await;
        let outcome = store
            .upsert_profiles(order.id, vec![profile("T1", 0)])
            .await
            .unwrap();
        let profile_id = outcome.profiles[0].id;
        store
            .create_usage_alert(NewUsageAlert::new(profile_id, 80, AlertChannels::default()).unwrap())
            .await
            .unwrap();

        let below = store
            .record_usage("T1", DataVolume::from_bytes(790), None)
            .await
            .unwrap();
        assert!(below.triggered.is_empty());

        let crossed = store
            .record_usage("T1", DataVolume::from_bytes(810), None)
            .await
            .unwrap();
        assert_eq!(crossed.triggered.len(), 1);
        assert_eq!(crossed.triggered[0].percent_used, 81);

        let again = store
            .record_usage("T1", DataVolume::from_bytes(900), None)
            .await
            .unwrap();
        assert!(again.triggered.is_empty());
        assert!(store.list_usage_alerts(profile_id).await.unwrap()[0].triggered);
    }

    #[tokio::test]
    async fn record_usage_accepts_regression() {
        let store = InMemoryOrderStore::new();
        let order = processing_order(&store, UserId::new()).await;
        store
            .upsert_profiles(order.id, vec![profile("T1", 500)])
            .await
            .unwrap();

        let update = store
            .record_usage("T1", DataVolume::from_bytes(100), Some(DataVolume::from_bytes(2000)))
            .await
            .unwrap();
        assert_eq!(update.profile.used_volume.bytes(), 100);
        assert_eq!(update.profile.total_volume.bytes(), 2000);
    }

    #[tokio::test]
    async fn record_usage_unknown_profile() {
        let store = InMemoryOrderStore::new();
        let result = store
            .record_usage("missing", DataVolume::from_bytes(1), None)
            .await;
        assert!(matches!(result, Err(StoreError::ProfileNotFound(_))));
    }

    #[tokio::test]
    async fn adjust_credit_never_goes_negative() {
        let store = InMemoryOrderStore::new();
        let user_id = UserId::new();
        store
            .adjust_credit(user_id, Money::from_cents(100))
            .await
            .unwrap();
        let result = store.adjust_credit(user_id, Money::from_cents(-200)).await;
        assert!(matches!(result, Err(StoreError::InsufficientCredit { .. })));
        assert_eq!(
            store.get_account(user_id).await.unwrap().credit_balance.cents(),
            100
        );
    }

    #[tokio::test]
    async fn webhook_log_lifecycle() {
        let store = InMemoryOrderStore::new();
        let log = store
            .append_webhook_log(WebhookSource::Provider, "ORDER_STATUS", "{}")
            .await
            .unwrap();
        store
            .append_webhook_log(WebhookSource::Payment, "checkout.session.completed", "{}")
            .await
            .unwrap();

        let pending = store
            .list_unprocessed_webhooks(WebhookSource::Provider)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        store.mark_webhook_processed(log.id).await.unwrap();
        assert!(
            store
                .list_unprocessed_webhooks(WebhookSource::Provider)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
