//! Reservation rows and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProductId, ReservationId, Result, SessionId, StockError};

/// Default lifetime of a reservation when the caller does not supply one.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// The status of a reservation.
///
/// State transitions:
/// ```text
/// Reserved ──┬──► Confirmed { settled_at: None } ──► Confirmed { settled_at: Some(_) }
///            ├──► Released
///            └──► Expired
/// ```
///
/// Every transition out of `Reserved` is terminal; a session that wants the
/// stock again gets a new reservation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding stock until `expires_at`.
    Reserved { expires_at: DateTime<Utc> },

    /// Converted into an order. Keeps consuming capacity until the
    /// fulfillment side reports the physical stock decrement via `settled_at`.
    Confirmed { settled_at: Option<DateTime<Utc>> },

    /// Lapsed without being confirmed or released.
    Expired,

    /// Given back by the cart.
    Released,
}

impl ReservationStatus {
    pub const RESERVED: &'static str = "reserved";
    pub const CONFIRMED: &'static str = "confirmed";
    pub const EXPIRED: &'static str = "expired";
    pub const RELEASED: &'static str = "released";

    /// Rebuilds a status from its stored columns.
    pub fn from_columns(
        status: &str,
        expires_at: DateTime<Utc>,
        settled_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        match status {
            Self::RESERVED => Ok(Self::Reserved { expires_at }),
            Self::CONFIRMED => Ok(Self::Confirmed { settled_at }),
            Self::EXPIRED => Ok(Self::Expired),
            Self::RELEASED => Ok(Self::Released),
            other => Err(StockError::Validation(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved { .. } => Self::RESERVED,
            Self::Confirmed { .. } => Self::CONFIRMED,
            Self::Expired => Self::EXPIRED,
            Self::Released => Self::RELEASED,
        }
    }

    /// Returns true if this is a reservation that still holds stock at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Self::Reserved { expires_at } if *expires_at > now)
    }

    /// Returns true if the reservation lapsed but has not been swept yet.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Self::Reserved { expires_at } if *expires_at <= now)
    }

    /// Returns true if the row's quantity must be subtracted from stock.
    pub fn counts_against_stock(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Reserved { expires_at } => *expires_at > now,
            Self::Confirmed { settled_at } => settled_at.is_none(),
            Self::Expired | Self::Released => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reserved { .. })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Reserved { expires_at } => Some(*expires_at),
            _ => None,
        }
    }

    /// `Reserved → Confirmed`.
    pub fn confirm(self) -> Result<Self> {
        match self {
            Self::Reserved { .. } => Ok(Self::Confirmed { settled_at: None }),
            other => Err(other.invalid(Self::CONFIRMED)),
        }
    }

    /// `Reserved → Released`.
    pub fn release(self) -> Result<Self> {
        match self {
            Self::Reserved { .. } => Ok(Self::Released),
            other => Err(other.invalid(Self::RELEASED)),
        }
    }

    /// `Reserved → Expired`, only once `expires_at` has passed.
    pub fn expire(self, now: DateTime<Utc>) -> Result<Self> {
        match self {
            Self::Reserved { expires_at } if expires_at <= now => Ok(Self::Expired),
            other => Err(other.invalid(Self::EXPIRED)),
        }
    }

    /// Stamps an unsettled confirmation as settled.
    pub fn settle(self, at: DateTime<Utc>) -> Result<Self> {
        match self {
            Self::Confirmed { settled_at: None } => Ok(Self::Confirmed {
                settled_at: Some(at),
            }),
            other => Err(other.invalid("settled")),
        }
    }

    fn invalid(self, to: &'static str) -> StockError {
        StockError::InvalidTransition {
            from: self.as_str(),
            to,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A claim on a quantity of one product, owned by a cart session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub product_id: ProductId,
    pub session_id: SessionId,
    pub quantity: i32,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.status.expires_at()
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active_at(now)
    }
}

/// A reservation together with the product's availability right after the
/// change was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationOutcome {
    pub reservation: Reservation,
    pub available_stock: i32,
}

/// The slice of a product row this crate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: ProductId,
    pub stock: i32,
    pub is_active: bool,
}

/// Stock left once `committed` units are subtracted, never below zero.
pub fn available_stock(stock: i32, committed: i32) -> i32 {
    stock.saturating_sub(committed).max(0)
}
