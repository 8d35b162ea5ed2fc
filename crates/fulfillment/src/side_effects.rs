//! Post-completion and post-usage side effects.
//!
//! The store commits each state change together with its bookkeeping
//! (referral credit, alert flags). The dispatcher runs the store call and
//! then notifies exactly the callers whose call made the change, so a race
//! between the poll loop and a webhook never produces a second notification.

use std::sync::Arc;

use common::OrderId;
use domain::{DataVolume, ReferralTerms, TriggeredAlert};
use order_store::{Completion, OrderStore, UsageUpdate};

use crate::error::Result;
use crate::services::Notifier;

/// Runs completion and usage updates and the notifications they trigger.
pub struct SideEffectDispatcher<S> {
    store: S,
    terms: ReferralTerms,
    notifier: Arc<dyn Notifier>,
}

impl<S: Clone> Clone for SideEffectDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            terms: self.terms,
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<S: OrderStore> SideEffectDispatcher<S> {
    pub fn new(store: S, terms: ReferralTerms, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            terms,
            notifier,
        }
    }

    /// Completes an order and, if this call performed the transition, sends
    /// the ready notification and the referral notification.
    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, order_id: OrderId) -> Result<Completion> {
        let completion = self.store.complete_order(order_id, &self.terms).await?;

        if !completion.transitioned {
            tracing::debug!(status = %completion.order.status, "completion already applied");
            return Ok(completion);
        }

        metrics::counter!("orders_completed_total").increment(1);
        tracing::info!(user_id = %completion.order.user_id, "order completed");

        let profiles = self.store.list_profiles(order_id).await?;
        self.notifier
            .order_completed(&completion.order, &profiles)
            .await;

        if let Some(reward) = &completion.referral {
            metrics::counter!("referrals_credited_total").increment(1);
            tracing::info!(
                reward_id = %reward.id,
                referrer_id = %reward.referrer_id,
                amount = reward.amount.cents(),
                "referral reward credited"
            );
            self.notifier.referral_credited(reward).await;
        }

        Ok(completion)
    }

    /// Records reported usage and notifies every alert that fired.
    #[tracing::instrument(skip(self))]
    pub async fn record_usage(
        &self,
        esim_tran_no: &str,
        used: DataVolume,
        total: Option<DataVolume>,
    ) -> Result<UsageUpdate> {
        let update = self.store.record_usage(esim_tran_no, used, total).await?;
        self.notify_triggered(&update.triggered).await;
        Ok(update)
    }

    /// Sends one notification per fired alert.
    pub async fn notify_triggered(&self, triggered: &[TriggeredAlert]) {
        for fired in triggered {
            metrics::counter!("usage_alerts_triggered_total").increment(1);
            tracing::info!(
                alert_id = %fired.alert.id,
                threshold = fired.alert.threshold,
                percent_used = fired.percent_used,
                "usage alert triggered"
            );
            self.notifier.usage_alert(fired).await;
        }
    }

    /// Forwards a provider balance alert.
    pub async fn balance_alert(&self, payload: &serde_json::Value) {
        self.notifier.balance_alert(payload).await;
    }

    pub fn terms(&self) -> &ReferralTerms {
        &self.terms
    }
}
