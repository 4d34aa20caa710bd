//! Stock reservation repository.
//!
//! Tracks time-bounded claims that cart sessions hold on product stock and
//! guarantees that active claims never exceed the physical stock of a
//! product. Two backends share the [`ReservationStore`] trait: PostgreSQL,
//! which serialises claims per product with row locks, and an in-memory
//! store for tests and local development.

pub mod error;
pub mod events;
pub mod memory;
pub mod postgres;
pub mod reservation;
pub mod store;
pub mod sweeper;

pub use common::{ProductId, ReservationId, SessionId};
pub use error::{Result, StockError};
pub use events::ReservationConfirmed;
pub use memory::InMemoryReservationStore;
pub use postgres::PgReservationStore;
pub use reservation::{
    DEFAULT_TTL_MINUTES, ProductStock, Reservation, ReservationOutcome, ReservationStatus,
    available_stock,
};
pub use store::{MAX_TTL_MINUTES, ReservationStore, ReserveStock};
pub use sweeper::{ExpirySweeper, SweeperHandle};
