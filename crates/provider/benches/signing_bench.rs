use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use provider::signing;

const SECRET: &str = "bench-secret-key";
const ACCESS_CODE: &str = "bench-access-code";

fn body(profiles: usize) -> Vec<u8> {
    let list: Vec<_> = (0..profiles)
        .map(|i| {
            serde_json::json!({
                "esimTranNo": format!("2501010000{i:04}"),
                "iccid": format!("898520000000000{i:04}"),
                "totalVolume": 5368709120u64,
                "orderUsage": 0
            })
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({ "esimList": list })).unwrap()
}

fn bench_sign(c: &mut Criterion) {
    let mut group = c.benchmark_group("signing/sign");
    for profiles in [1, 10, 100] {
        let body = body(profiles);
        group.bench_with_input(BenchmarkId::from_parameter(profiles), &body, |b, body| {
            b.iter(|| {
                signing::sign(SECRET, "1700000000000", "req-1", ACCESS_CODE, black_box(body))
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let body = body(10);
    let signature = signing::sign(SECRET, "1700000000000", "req-1", ACCESS_CODE, &body).unwrap();

    c.bench_function("signing/verify_10_profiles", |b| {
        b.iter(|| {
            signing::verify(
                SECRET,
                "1700000000000",
                "req-1",
                ACCESS_CODE,
                black_box(&body),
                black_box(&signature),
            )
        });
    });
}

criterion_group!(benches, bench_sign, bench_verify);
criterion_main!(benches);
