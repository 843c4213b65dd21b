use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaillierError {
    #[error("plaintext outside [0, n)")]
    Range,

    #[error("no modular inverse: operands are not coprime")]
    NoInverse,

    #[error("key generation failed: mu is not invertible")]
    KeyGen,

    #[error("invalid key size: {bits} bits (must be even and at least {min})")]
    InvalidKeySize { bits: u64, min: u64 },

    #[error("ciphertext outside the key's domain")]
    InvalidCiphertext,

    #[error("invalid public modulus: {0}")]
    InvalidModulus(String),
}
