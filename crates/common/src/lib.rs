//! Identifier types shared across the stock reservation crates.

pub mod types;

pub use types::{ProductId, ReservationId, SessionId};
