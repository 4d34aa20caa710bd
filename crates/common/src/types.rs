use serde::{Deserialize, Serialize};

/// Identifier of a product row in the stock ledger.
///
/// Products are owned by the catalogue service; this crate only ever
/// refers to them by their integer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i32);

impl ProductId {
    /// Wraps a raw product key.
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw product key.
    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ProductId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Monotonic identifier assigned to a reservation row on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(i64);

impl ReservationId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ReservationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Opaque cart/session key that owns reservations.
///
/// The engine never interprets the contents; it is only compared for
/// equality when looking up a session's reservations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_id_preserves_value() {
        let id = ProductId::new(42);
        assert_eq!(id.as_i32(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn reservation_ids_order_by_value() {
        assert!(ReservationId::new(1) < ReservationId::new(2));
    }

    #[test]
    fn session_id_is_transparent_in_json() {
        let id = SessionId::new("cart-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cart-abc\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn blank_session_ids_are_detected() {
        assert!(SessionId::new("").is_blank());
        assert!(SessionId::new("   ").is_blank());
        assert!(!SessionId::new("s-1").is_blank());
    }
}
