use criterion::{Criterion, criterion_group, criterion_main};
use reservation_store::{
    InMemoryReservationStore, ProductId, ReservationStore, ReserveStock, SessionId,
};

const PRODUCT: ProductId = ProductId::new(1);

async fn seeded_store(reservations: usize) -> InMemoryReservationStore {
    let store = InMemoryReservationStore::new();
    store.upsert_product(PRODUCT, i32::MAX, true).await;
    for i in 0..reservations {
        store
            .reserve(ReserveStock::new(PRODUCT, format!("seed-{i}"), 1))
            .await
            .unwrap();
    }
    store
}

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(seeded_store(0));
    let session = SessionId::new("bench");

    c.bench_function("reservation_store/reserve_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .reserve(ReserveStock::new(PRODUCT, session.clone(), 1))
                    .await
                    .unwrap();
                store.release(&session, Some(PRODUCT)).await.unwrap();
            });
        });
    });
}

fn bench_available_stock(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("reservation_store/available_stock");

    for count in [10, 1_000] {
        let store = rt.block_on(seeded_store(count));
        group.bench_function(format!("{count}_reservations"), |b| {
            b.iter(|| {
                rt.block_on(async {
                    store.available_stock(PRODUCT).await.unwrap();
                });
            });
        });
    }

    group.finish();
}

fn bench_expire_stale(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("reservation_store/expire_stale_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = seeded_store(1_000).await;
                store
                    .advance_clock(chrono::Duration::minutes(31))
                    .await;
                store.expire_stale().await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_release,
    bench_available_stock,
    bench_expire_stale
);
criterion_main!(benches);
