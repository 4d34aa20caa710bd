use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::{
    ProductId, ProductStock, Reservation, ReservationConfirmed, ReservationId, ReservationOutcome,
    ReservationStatus, Result, SessionId, StockError, available_stock,
    store::{ReservationStore, ReserveStock, validate_quantity, validate_session},
};

#[derive(Debug, Default)]
struct InMemoryState {
    products: HashMap<ProductId, ProductStock>,
    reservations: Vec<Reservation>,
    next_id: i64,
    clock_offset: Duration,
}

impl InMemoryState {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_offset
    }

    fn product(&self, product_id: ProductId) -> Result<ProductStock> {
        self.products
            .get(&product_id)
            .copied()
            .ok_or(StockError::ProductNotFound(product_id))
    }

    fn committed(&self, product_id: ProductId, now: DateTime<Utc>) -> i32 {
        self.reservations
            .iter()
            .filter(|r| r.product_id == product_id && r.status.counts_against_stock(now))
            .map(|r| r.quantity)
            .sum()
    }

    fn active_mut(
        &mut self,
        session_id: &SessionId,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| {
            r.product_id == product_id && &r.session_id == session_id && r.is_active_at(now)
        })
    }

    /// Transitions every row matching `filter` with `transition`, returning the
    /// updated rows.
    fn transition_where(
        &mut self,
        now: DateTime<Utc>,
        filter: impl Fn(&Reservation) -> bool,
        transition: impl Fn(ReservationStatus) -> Result<ReservationStatus>,
    ) -> Result<Vec<Reservation>> {
        let mut changed = Vec::new();
        for reservation in self.reservations.iter_mut().filter(|r| filter(r)) {
            reservation.status = transition(reservation.status)?;
            reservation.updated_at = now;
            changed.push(reservation.clone());
        }
        Ok(changed)
    }
}

/// In-memory reservation store for tests and local development.
///
/// A single write lock is held for the whole read-decide-write sequence of
/// every mutation, which serialises reservations across all products.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryReservationStore {
    /// Creates an empty store with no products.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a product in the stock ledger.
    pub async fn upsert_product(&self, product_id: ProductId, stock: i32, is_active: bool) {
        self.state.write().await.products.insert(
            product_id,
            ProductStock {
                product_id,
                stock,
                is_active,
            },
        );
    }

    /// Overwrites a product's physical stock, as the fulfillment side does
    /// after an order ships.
    pub async fn set_stock(&self, product_id: ProductId, stock: i32) -> Result<()> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(StockError::ProductNotFound(product_id))?;
        product.stock = stock;
        Ok(())
    }

    /// Shifts the store's clock forward, for exercising expiry.
    pub async fn advance_clock(&self, by: Duration) {
        let mut state = self.state.write().await;
        state.clock_offset += by;
    }

    /// Looks up a single reservation row.
    pub async fn reservation(&self, reservation_id: ReservationId) -> Option<Reservation> {
        self.state
            .read()
            .await
            .reservations
            .iter()
            .find(|r| r.id == reservation_id)
            .cloned()
    }

    /// Returns the total number of reservation rows, in any status.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    async fn reserve(&self, request: ReserveStock) -> Result<ReservationOutcome> {
        request.validate()?;

        let mut state = self.state.write().await;
        let now = state.now();

        let product = state.product(request.product_id)?;
        if !product.is_active {
            return Err(StockError::ProductUnavailable(request.product_id));
        }

        let committed = state.committed(request.product_id, now);
        let available = available_stock(product.stock, committed);
        if available < request.quantity {
            metrics::counter!("stock_reservations_rejected_total").increment(1);
            return Err(StockError::InsufficientStock {
                product_id: request.product_id,
                requested: request.quantity,
                available,
            });
        }

        // Lapsed rows of this pair would otherwise shadow the new claim.
        let session_id = request.session_id.clone();
        state.transition_where(
            now,
            |r| {
                r.product_id == request.product_id
                    && r.session_id == session_id
                    && r.status.is_stale_at(now)
            },
            |status| status.expire(now),
        )?;

        let expires_at = now + request.ttl();
        let reservation = match state.active_mut(&request.session_id, request.product_id, now) {
            Some(existing) => {
                existing.quantity += request.quantity;
                existing.status = ReservationStatus::Reserved { expires_at };
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                state.next_id += 1;
                let reservation = Reservation {
                    id: ReservationId::new(state.next_id),
                    product_id: request.product_id,
                    session_id: request.session_id,
                    quantity: request.quantity,
                    status: ReservationStatus::Reserved { expires_at },
                    created_at: now,
                    updated_at: now,
                };
                state.reservations.push(reservation.clone());
                reservation
            }
        };

        metrics::counter!("stock_reservations_created_total").increment(1);
        Ok(ReservationOutcome {
            reservation,
            available_stock: available_stock(product.stock, committed + request.quantity),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn release(
        &self,
        session_id: &SessionId,
        product_id: Option<ProductId>,
    ) -> Result<u64> {
        validate_session(session_id)?;

        let mut state = self.state.write().await;
        let now = state.now();
        let released = state.transition_where(
            now,
            |r| {
                &r.session_id == session_id
                    && product_id.is_none_or(|p| p == r.product_id)
                    && !r.status.is_terminal()
            },
            ReservationStatus::release,
        )?;

        let count = released.len() as u64;
        metrics::counter!("stock_reservations_released_total").increment(count);
        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn confirm(&self, session_id: &SessionId) -> Result<Vec<ReservationConfirmed>> {
        validate_session(session_id)?;

        let mut state = self.state.write().await;
        let now = state.now();
        let confirmed = state.transition_where(
            now,
            |r| &r.session_id == session_id && r.is_active_at(now),
            ReservationStatus::confirm,
        )?;

        metrics::counter!("stock_reservations_confirmed_total").increment(confirmed.len() as u64);
        Ok(confirmed
            .iter()
            .map(|r| ReservationConfirmed::from_reservation(r, now))
            .collect())
    }

    async fn expire_stale(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = state.now();
        let expired = state.transition_where(
            now,
            |r| r.status.is_stale_at(now),
            |status| status.expire(now),
        )?;

        let count = expired.len() as u64;
        metrics::counter!("stock_reservations_expired_total").increment(count);
        Ok(count)
    }

    async fn available_stock(&self, product_id: ProductId) -> Result<i32> {
        let state = self.state.read().await;
        let now = state.now();
        let product = state.product(product_id)?;
        Ok(available_stock(
            product.stock,
            state.committed(product_id, now),
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn update_quantity(
        &self,
        session_id: &SessionId,
        product_id: ProductId,
        new_quantity: i32,
    ) -> Result<Option<ReservationOutcome>> {
        validate_session(session_id)?;
        validate_quantity(new_quantity)?;

        let mut state = self.state.write().await;
        let now = state.now();
        let product = state.product(product_id)?;
        let committed = state.committed(product_id, now);
        let available = available_stock(product.stock, committed);

        let Some(existing) = state.active_mut(session_id, product_id, now) else {
            return Ok(None);
        };

        let diff = new_quantity - existing.quantity;
        if diff > 0 {
            if !product.is_active {
                return Err(StockError::ProductUnavailable(product_id));
            }
            if available < diff {
                metrics::counter!("stock_reservations_rejected_total").increment(1);
                return Err(StockError::InsufficientStock {
                    product_id,
                    requested: diff,
                    available,
                });
            }
        }

        existing.quantity = new_quantity;
        existing.updated_at = now;
        let reservation = existing.clone();

        Ok(Some(ReservationOutcome {
            reservation,
            available_stock: available_stock(product.stock, committed + diff),
        }))
    }

    async fn session_reservations(&self, session_id: &SessionId) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<_> = state
            .reservations
            .iter()
            .filter(|r| &r.session_id == session_id)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(reservations)
    }

    async fn pending_confirmations(&self, limit: usize) -> Result<Vec<ReservationConfirmed>> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state
            .reservations
            .iter()
            .filter(|r| matches!(r.status, ReservationStatus::Confirmed { settled_at: None }))
            .collect();
        pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|r| ReservationConfirmed::from_reservation(r, r.updated_at))
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn settle_confirmation(&self, reservation_id: ReservationId) -> Result<bool> {
        let mut state = self.state.write().await;
        let now = state.now();
        let reservation = state
            .reservations
            .iter_mut()
            .find(|r| r.id == reservation_id)
            .ok_or(StockError::ReservationNotFound(reservation_id))?;

        if let ReservationStatus::Confirmed {
            settled_at: Some(_),
        } = reservation.status
        {
            return Ok(false);
        }

        reservation.status = reservation.status.settle(now)?;
        Ok(true)
    }
}
