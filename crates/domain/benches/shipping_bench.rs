use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Money, NoFreightQuote, ShippingConfig, ShippingItem, resolve_shipping_cost};

fn cart(lines: usize) -> Vec<ShippingItem> {
    (0..lines)
        .map(|i| {
            let weight = if i % 7 == 0 {
                None
            } else {
                Some((i as u32 * 137) % 6000)
            };
            ShippingItem::physical(1 + (i as u32 % 3), Money::from_cents(1299), weight)
        })
        .collect()
}

fn bench_weight_tier_cascade(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = ShippingConfig::default();
    let items = cart(25);

    c.bench_function("shipping/weight_tier_25_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                resolve_shipping_cost(&items, Money::from_cents(2500), &config, &NoFreightQuote)
                    .await
            })
        });
    });
}

fn bench_free_shipping_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = ShippingConfig::default();
    let items = cart(200);

    c.bench_function("shipping/free_threshold_200_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                resolve_shipping_cost(&items, Money::from_cents(500_000), &config, &NoFreightQuote)
                    .await
            })
        });
    });
}

criterion_group!(
    benches,
    bench_weight_tier_cascade,
    bench_free_shipping_check
);
criterion_main!(benches);
