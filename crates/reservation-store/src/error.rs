use thiserror::Error;

use crate::{ProductId, ReservationId};

/// Errors that can occur when reading or mutating reservations.
#[derive(Debug, Error)]
pub enum StockError {
    /// The product does not exist in the stock ledger.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The reservation does not exist.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The product exists but is not accepting reservations.
    #[error("Product {0} is not available for reservation")]
    ProductUnavailable(ProductId),

    /// The requested quantity exceeds what is currently available.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i32,
        available: i32,
    },

    /// Malformed input, rejected before any transaction is opened.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A status transition that the reservation lifecycle does not allow.
    #[error("Invalid reservation transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StockError {
    /// Returns true for outcomes that are legitimate business answers
    /// rather than faults (insufficient stock, inactive product, bad input).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StockError::InsufficientStock { .. }
                | StockError::ProductUnavailable(_)
                | StockError::Validation(_)
                | StockError::InvalidTransition { .. }
        )
    }
}

/// Result type for reservation store operations.
pub type Result<T> = std::result::Result<T, StockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_not_faults() {
        assert!(StockError::Validation("bad".to_string()).is_rejection());
        assert!(
            StockError::InvalidTransition {
                from: "released",
                to: "confirmed"
            }
            .is_rejection()
        );
        assert!(!StockError::ProductNotFound(ProductId::new(1)).is_rejection());
        assert!(!StockError::Database(sqlx::Error::PoolClosed).is_rejection());
    }
}
