use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use shopping_auth::{Argon2Hasher, HashingParams, NewUser};
use shopping_core::{AggregateRoot, Entity, OrderId, ProductId, Quantity, UserId};
use shopping_infra::{InMemoryStore, Shop, Transaction};
use shopping_inventory::plan;
use shopping_sales::{Order, OrderedItem};

fn setup() -> Shop<InMemoryStore> {
    try_setup().expect("bench setup")
}

fn try_setup() -> anyhow::Result<Shop<InMemoryStore>> {
    let hasher = Argon2Hasher::new(
        16,
        HashingParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
    )?;
    Ok(Shop::new(InMemoryStore::new(), Arc::new(hasher)))
}

fn empty_order(shop: &Shop<InMemoryStore>) -> anyhow::Result<OrderId> {
    let order = Order::new(UserId::new());
    let mut tx = Transaction::begin(shop.store());
    tx.put(order.clone())?;
    tx.commit()?;
    Ok(*order.id())
}

fn bench_plan(c: &mut Criterion) {
    let product_id = ProductId::new();
    c.bench_function("plan_resave", |b| {
        b.iter(|| {
            plan(
                black_box(product_id),
                black_box(40),
                black_box(Quantity::new(7)),
                black_box(Quantity::new(12)),
            )
        })
    });
}

fn bench_reservation_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservation_latency");

    group.bench_function("save_new_item", |b| {
        let shop = setup();
        let product_id = *shop
            .create_product("Tea", u64::MAX / 2)
            .expect("create product")
            .id();
        let order_id = empty_order(&shop).expect("order");
        b.iter(|| {
            shop.save_ordered_item(black_box(OrderedItem::new(order_id, product_id, 1)))
                .expect("save item")
        });
    });

    // Rehydration cost grows with ledger length.
    for history in [10u64, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*history));
        group.bench_with_input(
            BenchmarkId::new("resave_with_history", history),
            history,
            |b, &history| {
                let shop = setup();
                let product_id = *shop.create_product("Tea", 10).expect("create").id();
                for _ in 0..history {
                    shop.receive_stock(product_id, 1).expect("receive");
                }
                let order_id = empty_order(&shop).expect("order");
                let mut item = OrderedItem::new(order_id, product_id, 1);
                shop.save_ordered_item(item.clone()).expect("first save");

                let mut flip = false;
                b.iter(|| {
                    flip = !flip;
                    item.set_quantity(if flip { 2 } else { 1 });
                    shop.save_ordered_item(item.clone()).expect("resave")
                });
            },
        );
    }

    group.finish();
}

fn bench_place_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("place_order");

    for lines in [1usize, 10, 50].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, &lines| {
            let shop = setup();
            let user_id = *shop
                .register_user(NewUser {
                    username: "bench".to_string(),
                    password: "bench-password".to_string(),
                    password_confirmation: "bench-password".to_string(),
                    is_admin: false,
                })
                .expect("register")
                .id();
            let products: Vec<ProductId> = (0..lines)
                .map(|i| {
                    *shop
                        .create_product(&format!("P{i}"), u64::MAX / 2)
                        .expect("create")
                        .id()
                })
                .collect();

            b.iter(|| {
                for product_id in &products {
                    shop.add_to_cart(user_id, *product_id, 1).expect("add");
                }
                shop.place_order(user_id).expect("place order")
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_plan,
    bench_reservation_latency,
    bench_place_order
);
criterion_main!(benches);
