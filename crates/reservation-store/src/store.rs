use async_trait::async_trait;
use chrono::Duration;

use crate::{
    DEFAULT_TTL_MINUTES, ProductId, Reservation, ReservationConfirmed, ReservationId,
    ReservationOutcome, Result, SessionId, StockError,
};

/// Longest reservation lifetime accepted, one week.
pub const MAX_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Request to claim stock for a cart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub session_id: SessionId,
    pub quantity: i32,
    pub ttl_minutes: i64,
}

impl ReserveStock {
    /// Creates a request with the default lifetime.
    pub fn new(product_id: ProductId, session_id: impl Into<SessionId>, quantity: i32) -> Self {
        Self {
            product_id,
            session_id: session_id.into(),
            quantity,
            ttl_minutes: DEFAULT_TTL_MINUTES,
        }
    }

    /// Overrides the reservation lifetime.
    pub fn with_ttl_minutes(mut self, ttl_minutes: i64) -> Self {
        self.ttl_minutes = ttl_minutes;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::minutes(self.ttl_minutes)
    }

    /// Checks the request shape before any transaction is opened.
    pub fn validate(&self) -> Result<()> {
        validate_session(&self.session_id)?;
        validate_quantity(self.quantity)?;
        if self.ttl_minutes <= 0 || self.ttl_minutes > MAX_TTL_MINUTES {
            return Err(StockError::Validation(format!(
                "ttl_minutes must be between 1 and {MAX_TTL_MINUTES}, got {}",
                self.ttl_minutes
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_quantity(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(StockError::Validation(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_session(session_id: &SessionId) -> Result<()> {
    if session_id.is_blank() {
        return Err(StockError::Validation(
            "session_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// The reservation repository.
///
/// This is the only component allowed to compute available stock or to
/// touch reservation rows. Implementations must serialise
/// `reserve`/`update_quantity` per product so that the sum of active
/// reservations never exceeds the product's stock.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Claims `quantity` units for the session.
    ///
    /// If the session already holds an active reservation for the product the
    /// quantity is added to it and its expiry refreshed. Fails with
    /// `InsufficientStock` (carrying the current availability) when the
    /// request does not fit.
    async fn reserve(&self, request: ReserveStock) -> Result<ReservationOutcome>;

    /// Releases the session's active reservations, optionally only for one
    /// product. Returns the number of rows released; calling it again
    /// returns zero.
    async fn release(&self, session_id: &SessionId, product_id: Option<ProductId>)
    -> Result<u64>;

    /// Confirms every active reservation of the session and returns one event
    /// per confirmed row. Does not touch the stock ledger.
    async fn confirm(&self, session_id: &SessionId) -> Result<Vec<ReservationConfirmed>>;

    /// Marks lapsed reservations as expired. Returns the number of rows swept.
    async fn expire_stale(&self) -> Result<u64>;

    /// Stock minus everything currently committed, floored at zero.
    ///
    /// Takes no locks; the value may be stale by the time it is displayed.
    async fn available_stock(&self, product_id: ProductId) -> Result<i32>;

    /// Sets the quantity of the session's active reservation for a product.
    ///
    /// Returns `None` when there is no active reservation to update.
    async fn update_quantity(
        &self,
        session_id: &SessionId,
        product_id: ProductId,
        new_quantity: i32,
    ) -> Result<Option<ReservationOutcome>>;

    /// All reservations ever made by the session, newest first.
    async fn session_reservations(&self, session_id: &SessionId) -> Result<Vec<Reservation>>;

    /// Confirmations the fulfillment side has not settled yet, oldest first.
    async fn pending_confirmations(&self, limit: usize) -> Result<Vec<ReservationConfirmed>>;

    /// Records that the stock decrement for a confirmed reservation happened.
    ///
    /// Returns `false` if it had already been settled.
    async fn settle_confirmation(&self, reservation_id: ReservationId) -> Result<bool>;
}
