#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Core types and primitives for the FPC operator services.
//!
//! This crate holds everything the quote issuer and the reserve top-up
//! controller share: the rate/quote arithmetic and its hash binding, the
//! signer abstraction, secret resolution, and the transport-agnostic
//! contracts for the rollup node and the settlement-layer bridge.

pub mod config;
pub mod portal;
pub mod quote;
pub mod rollup;
pub mod secrets;
pub mod signing;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A rollup-side identity (contract, account or asset address).
///
/// Rollup addresses are field elements; they travel as 32-byte big-endian
/// words and are rendered as `0x`-prefixed, zero-padded lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address must be 0x-prefixed hex")]
    MissingPrefix,
    #[error("address has {0} hex digits, expected at most 64")]
    TooLong(usize),
    #[error("address is not valid hex: {0}")]
    InvalidHex(String),
}

impl FromStr for Address {
    type Err = AddressError;

    /// Accepts `0x` followed by 1..=64 hex digits; shorter inputs are left-padded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;
        if digits.is_empty() {
            return Err(AddressError::Empty);
        }
        if digits.len() > 64 {
            return Err(AddressError::TooLong(digits.len()));
        }
        let padded = format!("{digits:0>64}");
        let raw = hex::decode(padded).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&raw);
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Encode an unsigned integer as a 32-byte big-endian word.
pub fn u128_word(v: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&v.to_be_bytes());
    out
}

/// Decode a 32-byte big-endian word into `u128`, rejecting values that do not fit.
pub fn word_to_u128(word: &[u8; 32]) -> Option<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Some(u128::from_be_bytes(low))
}

/// Parse a `0x`-prefixed hex string into a 32-byte word (left-padded).
pub fn parse_word_hex(s: &str) -> Result<[u8; 32], AddressError> {
    s.parse::<Address>().map(|a| a.0)
}

/// Unix time in milliseconds from the system clock.
pub fn now_unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(ms).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_short_hex_and_pads() {
        let a: Address = "0x1".parse().unwrap();
        assert_eq!(a.0[31], 1);
        assert!(a.0[..31].iter().all(|b| *b == 0));
        assert_eq!(
            a.to_hex(),
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn address_rejects_bad_input() {
        assert_eq!("".parse::<Address>(), Err(AddressError::Empty));
        assert_eq!("1234".parse::<Address>(), Err(AddressError::MissingPrefix));
        assert!(matches!(
            format!("0x{}", "a".repeat(65)).parse::<Address>(),
            Err(AddressError::TooLong(65))
        ));
        assert!(matches!(
            "0xzz".parse::<Address>(),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn zero_address_is_detected() {
        let a: Address = "0x0".parse().unwrap();
        assert!(a.is_zero());
        assert_eq!(a, Address::ZERO);
    }

    #[test]
    fn words_round_trip_and_reject_wide_values() {
        let w = u128_word(u128::MAX);
        assert_eq!(word_to_u128(&w), Some(u128::MAX));
        let mut wide = [0u8; 32];
        wide[0] = 1;
        assert_eq!(word_to_u128(&wide), None);
    }
}
