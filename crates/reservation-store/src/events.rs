//! Events handed to the fulfillment side when reservations are confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProductId, Reservation, ReservationId, SessionId};

/// A reservation was converted into an order.
///
/// The fulfillment service consumes these, decrements `products.stock` by
/// `quantity` and then settles the confirmation. Until it is settled the
/// quantity keeps counting against availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConfirmed {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub session_id: SessionId,
    pub quantity: i32,
    pub confirmed_at: DateTime<Utc>,
}

impl ReservationConfirmed {
    pub fn from_reservation(reservation: &Reservation, confirmed_at: DateTime<Utc>) -> Self {
        Self {
            reservation_id: reservation.id,
            product_id: reservation.product_id,
            session_id: reservation.session_id.clone(),
            quantity: reservation.quantity,
            confirmed_at,
        }
    }
}
