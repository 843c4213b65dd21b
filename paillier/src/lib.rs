//! Paillier cryptosystem for the private aggregation exchange.
//!
//! This crate contains:
//! - Number-theoretic helpers (gcd/lcm, modular inverse, Miller-Rabin, prime sampling).
//! - Key generation, encryption and decryption.
//! - Homomorphic addition and plaintext-scalar multiplication over ciphertexts.
//! - Wire helpers that carry big integers as decimal strings.

pub mod cipher;
pub mod constants;
pub mod error;
pub mod keys;
pub mod math;
pub mod wire;

pub use cipher::Ciphertext;
pub use error::PaillierError;
pub use keys::{KeyPair, PrivateKey, PublicKey};

pub use num_bigint::{BigInt, BigUint};
