//! End-to-end fulfillment scenarios against the in-memory store and provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{
    AlertChannels, DataVolume, DurationUnit, LineItem, Money, NewUsageAlert, OrderStatus,
    ProfileStatus,
};
use fulfillment::payment::{self, CHECKOUT_COMPLETED, CHECKOUT_EXPIRED};
use fulfillment::{
    CheckoutOutcome, CheckoutRequest, FulfillmentConfig, FulfillmentError, InMemoryNotifier,
    InMemoryProvider, Notification, PaymentWebhookHandler, PollPolicy, ProviderWebhookAuth,
    ProvisioningCoordinator, Rejection, WebhookHeaders, WebhookOutcome, WebhookReconciler,
};
use order_store::{InMemoryOrderStore, OrderStore};
use provider::signing::SignedHeaders;
use serde_json::{Value, json};

const ACCESS_CODE: &str = "access-123";
const SECRET: &str = "provider-secret";
const PAYMENT_SECRET: &str = "whsec_test";
const FIVE_GIB: u64 = 5_368_709_120;

type TestCoordinator = ProvisioningCoordinator<InMemoryOrderStore, InMemoryProvider>;

struct TestHarness {
    coordinator: TestCoordinator,
    reconciler: WebhookReconciler<InMemoryOrderStore, InMemoryProvider>,
    payments: PaymentWebhookHandler<InMemoryOrderStore, InMemoryProvider>,
    store: InMemoryOrderStore,
    provider: InMemoryProvider,
    notifier: InMemoryNotifier,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_poll(PollPolicy {
            interval: Duration::from_millis(5),
            max_attempts: 3,
        })
    }

    fn with_poll(poll: PollPolicy) -> Self {
        let store = InMemoryOrderStore::new();
        let provider = InMemoryProvider::new();
        provider.add_package("JP-5GB-30D", DataVolume::from_bytes(FIVE_GIB));
        let notifier = InMemoryNotifier::new();

        let config = FulfillmentConfig {
            poll,
            ..Default::default()
        };
        let coordinator = ProvisioningCoordinator::new(
            store.clone(),
            provider.clone(),
            Arc::new(notifier.clone()),
            config,
        );
        let reconciler = WebhookReconciler::new(
            coordinator.clone(),
            ProviderWebhookAuth {
                access_code: ACCESS_CODE.to_string(),
                secret_key: Some(SECRET.to_string()),
            },
        );
        let payments =
            PaymentWebhookHandler::new(coordinator.clone(), Some(PAYMENT_SECRET.to_string()));

        Self {
            coordinator,
            reconciler,
            payments,
            store,
            provider,
            notifier,
        }
    }

    async fn funded_user(&self, cents: i64) -> UserId {
        let user_id = UserId::new();
        if cents > 0 {
            self.store
                .adjust_credit(user_id, Money::from_cents(cents))
                .await
                .unwrap();
        }
        user_id
    }

    async fn checkout(&self, user_id: UserId, credits: i64) -> CheckoutOutcome {
        self.coordinator
            .checkout(japan_5gb(user_id, credits))
            .await
            .unwrap()
    }

    async fn balance(&self, user_id: UserId) -> i64 {
        self.store
            .get_account(user_id)
            .await
            .unwrap()
            .credit_balance
            .cents()
    }

    async fn provider_webhook(&self, body: Value) -> fulfillment::Result<WebhookOutcome> {
        let raw = serde_json::to_vec(&body).unwrap();
        self.reconciler.ingest(&raw, &signed(&raw)).await
    }

    async fn order_status_webhook(&self, order_no: &str) -> fulfillment::Result<WebhookOutcome> {
        self.provider_webhook(json!({
            "notifyType": "ORDER_STATUS",
            "orderNo": order_no,
            "timestamp": "2025-01-01T00:00:00Z"
        }))
        .await
    }

    async fn payment_event(
        &self,
        kind: &str,
        order_id: OrderId,
        user_id: UserId,
    ) -> fulfillment::Result<WebhookOutcome> {
        let raw = serde_json::to_vec(&json!({
            "type": kind,
            "data": {"object": {"metadata": {
                "order_id": order_id.to_string(),
                "user_id": user_id.to_string()
            }}}
        }))
        .unwrap();
        let now = Utc::now().timestamp();
        let header = format!(
            "t={now},v1={}",
            payment::sign(PAYMENT_SECRET, now, &raw).unwrap()
        );
        self.payments.ingest(&raw, Some(&header)).await
    }
}

fn japan_5gb(user_id: UserId, credits: i64) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        currency: "USD".to_string(),
        items: vec![LineItem {
            package_code: "JP-5GB-30D".to_string(),
            name: "Japan 5GB 30 Days".to_string(),
            unit_price: Money::from_cents(700),
            quantity: 1,
            volume: DataVolume::from_bytes(FIVE_GIB),
            duration: 30,
            duration_unit: DurationUnit::Day,
            location_code: "JP".to_string(),
        }],
        credits: Money::from_cents(credits),
    }
}

fn signed(raw: &[u8]) -> WebhookHeaders {
    let headers = SignedHeaders::generate(SECRET, ACCESS_CODE, raw).unwrap();
    WebhookHeaders {
        signature: Some(headers.signature),
        timestamp: Some(headers.timestamp),
        request_id: Some(headers.request_id),
    }
}

fn accepted(outcome: &WebhookOutcome) -> bool {
    matches!(outcome, WebhookOutcome::Accepted { .. })
}

#[tokio::test]
async fn test_happy_path_credit_covered_order() {
    let h = TestHarness::new();
    let user_id = h.funded_user(700).await;

    let outcome = h.checkout(user_id, 700).await;

    assert_eq!(outcome.order.status, OrderStatus::Completed);
    assert!(outcome.amount_due.is_zero());
    assert!(outcome.order.order_no.is_some());
    assert_eq!(outcome.order.credits_used.cents(), 700);
    assert_eq!(outcome.profiles.len(), 1);
    assert_eq!(outcome.profiles[0].total_volume.bytes(), FIVE_GIB);
    assert_eq!(outcome.profiles[0].status, ProfileStatus::GotResource);
    assert!(outcome.profiles[0].activation_code.is_some());

    assert_eq!(h.balance(user_id).await, 0);
    assert_eq!(h.notifier.completions_for(outcome.order.id), 1);
    assert_eq!(h.provider.order_count(), 1);
}

#[tokio::test]
async fn test_poll_exhaustion_then_webhook_completes() {
    let h = TestHarness::new();
    h.provider.set_hold_profiles(true);
    let user_id = h.funded_user(700).await;

    let outcome = h.checkout(user_id, 700).await;
    assert_eq!(outcome.order.status, OrderStatus::Processing);
    assert!(outcome.profiles.is_empty());
    let order_no = outcome.order.order_no.clone().unwrap();
    assert_eq!(h.provider.query_calls(), 3);

    h.provider.release_profiles(&order_no);
    let result = h.order_status_webhook(&order_no).await.unwrap();
    assert!(accepted(&result));

    let details = h
        .coordinator
        .get_order_details(outcome.order.id)
        .await
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Completed);
    assert_eq!(details.profiles.len(), 1);
    assert_eq!(h.notifier.completions_for(outcome.order.id), 1);

    let logs = h.store.webhook_logs().await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].processed);
}

#[tokio::test(start_paused = true)]
async fn test_default_poll_budget_then_late_webhook() {
    let h = TestHarness::with_poll(PollPolicy::default());
    h.provider.set_hold_profiles(true);
    let user_id = h.funded_user(700).await;

    let started = tokio::time::Instant::now();
    let outcome = h.checkout(user_id, 700).await;

    assert_eq!(outcome.order.status, OrderStatus::Processing);
    assert_eq!(h.provider.query_calls(), 10);
    assert_eq!(started.elapsed(), PollPolicy::default().budget());

    // The provider finishes a minute after the loop gave up.
    tokio::time::advance(Duration::from_secs(60)).await;
    let order_no = outcome.order.order_no.clone().unwrap();
    h.provider.release_profiles(&order_no);
    let result = h.order_status_webhook(&order_no).await.unwrap();
    assert!(accepted(&result));

    let order = h.store.get_order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(h.notifier.completions_for(order.id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_webhook_during_default_poll_stops_loop() {
    let h = Arc::new(TestHarness::with_poll(PollPolicy::default()));
    h.provider.set_hold_profiles(true);
    let user_id = h.funded_user(700).await;

    let started = tokio::time::Instant::now();
    let checkout = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.checkout(user_id, 700).await })
    };

    // Three empty polls at 3s, 6s and 9s.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.provider.query_calls(), 3);
    let order = h.store.list_orders_for_user(user_id).await.unwrap().remove(0);
    assert_eq!(order.status, OrderStatus::Processing);

    let order_no = order.order_no.unwrap();
    h.provider.release_profiles(&order_no);
    let result = h.order_status_webhook(&order_no).await.unwrap();
    assert!(accepted(&result));

    let outcome = checkout.await.unwrap();
    assert_eq!(outcome.order.status, OrderStatus::Completed);
    assert_eq!(outcome.profiles.len(), 1);
    // Polling stopped on the tick after the webhook.
    assert_eq!(started.elapsed(), Duration::from_secs(12));
    assert_eq!(h.notifier.completions_for(order.id), 1);
}

#[tokio::test]
async fn test_duplicate_webhooks_are_idempotent() {
    let h = TestHarness::new();
    h.provider.set_hold_profiles(true);
    let user_id = h.funded_user(700).await;
    let outcome = h.checkout(user_id, 700).await;
    let order_no = outcome.order.order_no.clone().unwrap();
    h.provider.release_profiles(&order_no);

    for _ in 0..3 {
        let result = h.order_status_webhook(&order_no).await.unwrap();
        assert!(accepted(&result));
    }

    assert_eq!(h.store.profile_count().await, 1);
    assert_eq!(h.notifier.completions_for(outcome.order.id), 1);
    assert_eq!(h.store.webhook_logs().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_poll_and_webhook_race_completes_once() {
    let h = Arc::new(TestHarness::with_poll(PollPolicy {
        interval: Duration::from_millis(2),
        max_attempts: 500,
    }));
    h.provider.set_hold_profiles(true);
    let user_id = h.funded_user(700).await;

    let checkout = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.checkout(user_id, 700).await })
    };

    let order = loop {
        let orders = h.store.list_orders_for_user(user_id).await.unwrap();
        if let Some(order) = orders.into_iter().next()
            && order.order_no.is_some()
        {
            break order;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    };
    let order_no = order.order_no.clone().unwrap();

    h.provider.release_profiles(&order_no);
    let webhook = h.order_status_webhook(&order_no).await.unwrap();
    let outcome = checkout.await.unwrap();

    assert!(accepted(&webhook));
    assert_eq!(outcome.order.status, OrderStatus::Completed);
    assert_eq!(h.store.profile_count().await, 1);
    assert_eq!(h.notifier.completions_for(order.id), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_referral_credited_once_across_concurrent_orders() {
    let h = Arc::new(TestHarness::new());
    let referrer = UserId::new();
    let referred = h.funded_user(1400).await;
    h.store
        .create_referral_reward(referrer, referred, Money::from_cents(500))
        .await
        .unwrap();

    let first = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.checkout(referred, 700).await })
    };
    let second = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.checkout(referred, 700).await })
    };
    let first = first.await.unwrap();
    let second = second.await.unwrap();

    assert_eq!(first.order.status, OrderStatus::Completed);
    assert_eq!(second.order.status, OrderStatus::Completed);
    assert_eq!(h.balance(referrer).await, 500);
    // 1400 spent down to zero, plus the default welcome bonus.
    assert_eq!(h.balance(referred).await, 300);

    let credited = h
        .notifier
        .sent()
        .into_iter()
        .filter(|n| matches!(n, Notification::ReferralCredited { .. }))
        .count();
    assert_eq!(credited, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_usage_alert_fires_once_under_concurrent_reports() {
    let h = Arc::new(TestHarness::new());
    let user_id = h.funded_user(700).await;
    let outcome = h.checkout(user_id, 700).await;
    let profile = outcome.profiles[0].clone();
    let alert = h
        .store
        .create_usage_alert(NewUsageAlert::new(profile.id, 80, AlertChannels::default()).unwrap())
        .await
        .unwrap();

    let used = FIVE_GIB / 10 * 9;
    let mut tasks = Vec::new();
    for extra in 0..8u64 {
        let h = Arc::clone(&h);
        let esim_tran_no = profile.esim_tran_no.clone();
        tasks.push(tokio::spawn(async move {
            h.provider_webhook(json!({
                "notifyType": "DATA_USAGE",
                "esimTranNo": esim_tran_no,
                "usage": {"usedVolume": used + extra, "totalVolume": FIVE_GIB}
            }))
            .await
            .unwrap()
        }));
    }
    for task in tasks {
        assert!(accepted(&task.await.unwrap()));
    }

    assert_eq!(h.notifier.alerts_for(alert.id), 1);
    let alerts = h.store.list_usage_alerts(profile.id).await.unwrap();
    assert!(alerts[0].triggered);
}

#[tokio::test]
async fn test_usage_below_threshold_does_not_fire() {
    let h = TestHarness::new();
    let user_id = h.funded_user(700).await;
    let outcome = h.checkout(user_id, 700).await;
    let profile = &outcome.profiles[0];
    let alert = h
        .store
        .create_usage_alert(NewUsageAlert::new(profile.id, 80, AlertChannels::default()).unwrap())
        .await
        .unwrap();

    h.provider_webhook(json!({
        "notifyType": "DATA_USAGE",
        "esimTranNo": profile.esim_tran_no,
        "usage": FIVE_GIB / 2
    }))
    .await
    .unwrap();

    assert_eq!(h.notifier.alerts_for(alert.id), 0);
    let stored = h.store.get_profile(&profile.esim_tran_no).await.unwrap().unwrap();
    assert_eq!(stored.used_volume.bytes(), FIVE_GIB / 2);
}

#[tokio::test]
async fn test_tampered_webhook_is_rejected_without_logging() {
    let h = TestHarness::new();
    let raw = br#"{"notifyType":"ORDER_STATUS","orderNo":"B1"}"#;
    let headers = signed(raw);
    let tampered = br#"{"notifyType":"ORDER_STATUS","orderNo":"B2"}"#;

    let outcome = h.reconciler.ingest(tampered, &headers).await.unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::Rejected(Rejection::InvalidSignature)
    );
    assert!(h.store.webhook_logs().await.is_empty());
}

#[tokio::test]
async fn test_unsigned_webhook_is_rejected() {
    let h = TestHarness::new();
    let outcome = h
        .reconciler
        .ingest(br#"{"notifyType":"ORDER_STATUS"}"#, &WebhookHeaders::default())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Rejected(Rejection::MissingHeaders));
}

#[tokio::test]
async fn test_malformed_webhook_body_is_a_validation_error() {
    let h = TestHarness::new();
    let raw = b"{not json";
    let err = h.reconciler.ingest(raw, &signed(raw)).await.unwrap_err();

    assert!(matches!(err, FulfillmentError::Validation(_)));
    assert!(h.store.webhook_logs().await.is_empty());
}

#[tokio::test]
async fn test_unknown_order_no_stays_unprocessed() {
    let h = TestHarness::new();

    let err = h.order_status_webhook("B-UNKNOWN").await.unwrap_err();

    assert!(matches!(err, FulfillmentError::UnknownOrderNo(_)));
    let logs = h.store.webhook_logs().await;
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].processed);
}

#[tokio::test]
async fn test_failed_webhook_is_replayed() {
    let h = TestHarness::new();
    h.provider.set_hold_profiles(true);
    let user_id = h.funded_user(700).await;
    let outcome = h.checkout(user_id, 700).await;
    let order_no = outcome.order.order_no.clone().unwrap();
    h.provider.release_profiles(&order_no);

    h.provider.fail_next_queries(1);
    let err = h.order_status_webhook(&order_no).await.unwrap_err();
    assert!(err.is_retryable());

    let summary = h.reconciler.replay_unprocessed().await.unwrap();
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.failed, 0);

    let order = h.store.get_order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    let summary = h.reconciler.replay_unprocessed().await.unwrap();
    assert_eq!(summary.replayed, 0);
}

#[tokio::test]
async fn test_smdp_event_updates_profile_status() {
    let h = TestHarness::new();
    let user_id = h.funded_user(700).await;
    let outcome = h.checkout(user_id, 700).await;
    let esim_tran_no = outcome.profiles[0].esim_tran_no.clone();

    let result = h
        .provider_webhook(json!({
            "notifyType": "SMDP_EVENT",
            "esimTranNo": esim_tran_no,
            "event": "INSTALLATION"
        }))
        .await
        .unwrap();
    assert!(accepted(&result));

    let ignored = h
        .provider_webhook(json!({
            "notifyType": "SMDP_EVENT",
            "esimTranNo": esim_tran_no,
            "event": "SOMETHING_ELSE"
        }))
        .await
        .unwrap();
    assert!(accepted(&ignored));

    let profile = h.store.get_profile(&esim_tran_no).await.unwrap().unwrap();
    assert_eq!(profile.status, ProfileStatus::Installed);
}

#[tokio::test]
async fn test_balance_alert_reaches_notifier_hook() {
    let h = TestHarness::new();

    let result = h
        .provider_webhook(json!({"notifyType": "BALANCE_ALERT", "timestamp": 1700000000}))
        .await
        .unwrap();

    assert!(accepted(&result));
    assert_eq!(h.notifier.sent(), vec![Notification::BalanceAlert]);
}

#[tokio::test]
async fn test_payment_webhook_pays_and_provisions() {
    let h = TestHarness::new();
    let user_id = h.funded_user(200).await;
    let outcome = h.checkout(user_id, 200).await;
    assert_eq!(outcome.order.status, OrderStatus::PendingPayment);
    assert_eq!(outcome.amount_due.cents(), 500);

    let first = h
        .payment_event(CHECKOUT_COMPLETED, outcome.order.id, user_id)
        .await
        .unwrap();
    let redelivered = h
        .payment_event(CHECKOUT_COMPLETED, outcome.order.id, user_id)
        .await
        .unwrap();

    assert!(accepted(&first));
    assert!(accepted(&redelivered));
    let order = h.store.get_order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.credits_used.cents(), 200);
    assert_eq!(h.balance(user_id).await, 0);
    assert_eq!(h.provider.order_count(), 1);
}

#[tokio::test]
async fn test_reserved_credit_survives_until_payment() {
    let h = TestHarness::new();
    let user_id = h.funded_user(200).await;
    let a = h.checkout(user_id, 200).await;
    assert_eq!(a.order.status, OrderStatus::PendingPayment);

    // The same 200 cannot cover a second order while A is unpaid.
    let err = h
        .coordinator
        .checkout(japan_5gb(user_id, 200))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::Store(order_store::StoreError::InsufficientCredit { .. })
    ));
    assert!(
        h.store
            .adjust_credit(user_id, Money::from_cents(-200))
            .await
            .is_err()
    );

    let result = h
        .payment_event(CHECKOUT_COMPLETED, a.order.id, user_id)
        .await
        .unwrap();
    assert!(accepted(&result));

    let order = h.store.get_order(a.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.credits_used.cents(), 200);
    assert!(h.store.webhook_logs().await.iter().all(|log| log.processed));
    assert_eq!(h.balance(user_id).await, 0);
}

#[tokio::test]
async fn test_expired_checkout_releases_reserved_credit() {
    let h = TestHarness::new();
    let user_id = h.funded_user(200).await;
    let outcome = h.checkout(user_id, 200).await;
    assert_eq!(h.balance(user_id).await, 0);

    h.payment_event(CHECKOUT_EXPIRED, outcome.order.id, user_id)
        .await
        .unwrap();

    let order = h.store.get_order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.balance(user_id).await, 200);
}

#[tokio::test]
async fn test_expired_checkout_cancels_order() {
    let h = TestHarness::new();
    let user_id = h.funded_user(0).await;
    let outcome = h.checkout(user_id, 0).await;

    let result = h
        .payment_event(CHECKOUT_EXPIRED, outcome.order.id, user_id)
        .await
        .unwrap();
    assert!(accepted(&result));

    let order = h.store.get_order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    // A late completion for a cancelled order changes nothing.
    h.payment_event(CHECKOUT_COMPLETED, outcome.order.id, user_id)
        .await
        .unwrap();
    let order = h.store.get_order(outcome.order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.provider.place_calls(), 0);
}

#[tokio::test]
async fn test_payment_webhook_with_bad_signature_is_rejected() {
    let h = TestHarness::new();
    let now = Utc::now().timestamp();
    let raw = br#"{"type":"checkout.session.completed","data":{"object":{}}}"#;
    let header = format!("t={now},v1={}", payment::sign("wrong", now, raw).unwrap());

    let outcome = h.payments.ingest(raw, Some(&header)).await.unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::Rejected(Rejection::InvalidSignature)
    );
    assert!(h.store.webhook_logs().await.is_empty());
}
