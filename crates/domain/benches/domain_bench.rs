use std::hint::black_box;

use chrono::Utc;
use common::{OrderId, ProfileId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    AlertChannels, DataVolume, DurationUnit, LineItem, Money, NewOrder, NewUsageAlert,
    ProfileStatus, ProfileUpsert, ProvisionedProfile, UsageAlert,
};

fn line_item(quantity: u32) -> LineItem {
    LineItem {
        package_code: "JP-5GB-30D".to_string(),
        name: "Japan 5GB 30 Days".to_string(),
        unit_price: Money::from_cents(700),
        quantity,
        volume: DataVolume::from_gib(5),
        duration: 30,
        duration_unit: DurationUnit::Day,
        location_code: "JP".to_string(),
    }
}

fn bench_new_order(c: &mut Criterion) {
    let user_id = UserId::new();
    let items: Vec<LineItem> = (1..=10).map(line_item).collect();

    c.bench_function("domain/new_order_10_items", |b| {
        b.iter(|| NewOrder::new(user_id, "USD", black_box(items.clone())).unwrap());
    });
}

fn bench_threshold_check(c: &mut Criterion) {
    let total = DataVolume::from_gib(5);
    let used = DataVolume::from_bytes(4_294_967_296);

    c.bench_function("domain/reaches_threshold", |b| {
        b.iter(|| black_box(used).reaches_threshold(black_box(total), black_box(80)));
    });
}

fn bench_alert_evaluation(c: &mut Criterion) {
    let now = Utc::now();
    let profile = ProvisionedProfile::from_upsert(
        OrderId::new(),
        ProfileUpsert {
            esim_tran_no: "BENCH-0001".to_string(),
            iccid: "8985200000000000001".to_string(),
            qr_code_url: None,
            activation_code: None,
            status: ProfileStatus::InUse,
            used_volume: DataVolume::from_gib(4),
            total_volume: DataVolume::from_gib(5),
            expires_at: None,
            activated_at: None,
        },
        now,
    );
    let alerts: Vec<UsageAlert> = [25u8, 50, 75, 80, 90, 100]
        .into_iter()
        .map(|t| {
            UsageAlert::from_new(
                NewUsageAlert::new(ProfileId::new(), t, AlertChannels::default()).unwrap(),
                now,
            )
        })
        .collect();

    c.bench_function("domain/evaluate_6_alerts", |b| {
        b.iter(|| {
            alerts
                .iter()
                .filter(|a| a.should_fire(profile.used_volume, profile.total_volume))
                .count()
        });
    });
}

criterion_group!(
    benches,
    bench_new_order,
    bench_threshold_check,
    bench_alert_evaluation,
);
criterion_main!(benches);
