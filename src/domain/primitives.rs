//! Domain primitives: PoolId, Address, RequestId, Epoch, RoundId.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a lending pool (one pool per underlying asset).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId(pub String);

impl PoolId {
    /// Create a PoolId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        PoolId(id.into())
    }

    /// Get the pool id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account address (submitter, borrower, liquidator).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Create an Address from a string.
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into())
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address must not be empty")]
    Empty,
    #[error("address must not contain whitespace")]
    Whitespace,
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(AddressParseError::Whitespace);
        }
        Ok(Address(s.to_string()))
    }
}

/// Unique id assigned to an accepted operation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accrual epoch: interest is accrued at most once per pool per epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn new(epoch: u64) -> Self {
        Epoch(epoch)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Number of epochs elapsed since `earlier` (zero if `earlier` is later).
    pub fn elapsed_since(&self, earlier: Epoch) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequential round number assigned by the coordinator at dispatch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        assert_eq!(
            Address::from_str("0xabc").unwrap(),
            Address::new("0xabc")
        );
        assert_eq!(Address::from_str(""), Err(AddressParseError::Empty));
        assert_eq!(
            Address::from_str("0x a"),
            Err(AddressParseError::Whitespace)
        );
    }

    #[test]
    fn test_pool_id_display_and_ordering() {
        let a = PoolId::new("ETH");
        let b = PoolId::new("USDC");
        assert_eq!(a.to_string(), "ETH");
        assert!(a < b);
    }

    #[test]
    fn test_epoch_elapsed_saturates() {
        assert_eq!(Epoch::new(10).elapsed_since(Epoch::new(4)), 6);
        assert_eq!(Epoch::new(4).elapsed_since(Epoch::new(10)), 0);
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new_v4(), RequestId::new_v4());
    }

    #[test]
    fn test_pool_id_serializes_transparently_as_tuple() {
        let json = serde_json::to_string(&PoolId::new("USDC")).unwrap();
        assert_eq!(json, "\"USDC\"");
    }
}
