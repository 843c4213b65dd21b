//! JSON-friendly encodings for big integers.
//!
//! Moduli and ciphertexts travel as decimal strings so that any JSON stack can carry them
//! without precision loss.

use num_bigint::BigUint;

/// `#[serde(with = "paillier::wire::decimal")]` for `BigUint` fields.
pub mod decimal {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_decimal(&s).ok_or_else(|| D::Error::custom("expected a non-negative decimal integer"))
    }
}

/// Parse a decimal string (surrounding whitespace allowed).
pub fn parse_decimal(s: &str) -> Option<BigUint> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigUint::parse_bytes(s.as_bytes(), 10)
}
