//! Concurrency properties of the in-memory reservation store.

use std::sync::Arc;

use futures_util::future::join_all;
use reservation_store::{
    InMemoryReservationStore, ProductId, ReservationStatus, ReservationStore, ReserveStock,
    SessionId, StockError,
};

const PRODUCT: ProductId = ProductId::new(100);

async fn store_with_stock(stock: i32) -> Arc<InMemoryReservationStore> {
    let store = InMemoryReservationStore::new();
    store.upsert_product(PRODUCT, stock, true).await;
    Arc::new(store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let store = store_with_stock(20).await;

    // 30 sessions asking for 1..=3 units each: 60 units requested against 20.
    let attempts = (0..30).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let quantity = (i % 3) + 1;
            store
                .reserve(ReserveStock::new(PRODUCT, format!("session-{i}"), quantity))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let reserved: i32 = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|o| o.reservation.quantity)
        .sum();
    assert!(reserved <= 20, "reserved {reserved} of 20");

    for result in &results {
        match result {
            Ok(_) => {}
            Err(StockError::InsufficientStock {
                requested,
                available,
                ..
            }) => assert!(available < requested),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(
        store.available_stock(PRODUCT).await.unwrap(),
        20 - reserved
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_enough_unit_reservations_succeed() {
    let store = store_with_stock(5).await;

    let attempts = (0..12).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .reserve(ReserveStock::new(PRODUCT, format!("session-{i}"), 1))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts).await;

    let succeeded = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_ok())
        .count();
    assert_eq!(succeeded, 5);
    assert_eq!(store.available_stock(PRODUCT).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_unit_contention_has_one_winner() {
    let store = store_with_stock(1).await;

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.reserve(ReserveStock::new(PRODUCT, "a", 1)).await })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.reserve(ReserveStock::new(PRODUCT, "b", 1)).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
    assert!(winner.is_ok());
    assert!(matches!(
        loser,
        Err(StockError::InsufficientStock { available: 0, .. })
    ));
}

#[tokio::test]
async fn reserve_then_confirm_keeps_capacity_consumed() {
    let store = store_with_stock(10).await;
    let session = SessionId::new("session-a");

    let outcome = store
        .reserve(ReserveStock::new(PRODUCT, session.clone(), 4))
        .await
        .unwrap();
    assert_eq!(outcome.available_stock, 6);

    let confirmed = store.confirm(&session).await.unwrap();
    assert_eq!(confirmed.len(), 1);

    let rows = store.session_reservations(&session).await.unwrap();
    assert!(matches!(rows[0].status, ReservationStatus::Confirmed { .. }));
    assert_eq!(store.available_stock(PRODUCT).await.unwrap(), 6);

    let pending = store.pending_confirmations(10).await.unwrap();
    assert_eq!(pending, confirmed);
}

#[tokio::test]
async fn concurrent_updates_respect_stock() {
    let store = store_with_stock(10).await;
    for i in 0..2 {
        store
            .reserve(ReserveStock::new(PRODUCT, format!("session-{i}"), 1))
            .await
            .unwrap();
    }

    // Both try to grow to 6; only one of them fits in the 8 units left.
    let updates = (0..2).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .update_quantity(&SessionId::new(format!("session-{i}")), PRODUCT, 6)
                .await
        })
    });
    let results: Vec<_> = join_all(updates)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(store.available_stock(PRODUCT).await.unwrap(), 3);
}
