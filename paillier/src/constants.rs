//! Crate-wide constants for key generation and primality testing.

/// Modulus size used by the exchange when nothing else is configured.
pub const DEFAULT_KEY_BITS: u64 = 1024;

/// Smallest modulus size `KeyPair::generate` accepts.
///
/// Anything this small is only useful for tests.
pub const MIN_KEY_BITS: u64 = 32;

/// Fixed Miller-Rabin witness set. Always checked before any random bases.
pub const MR_WITNESSES: [u32; 7] = [2, 3, 5, 7, 11, 13, 17];

/// Random-base Miller-Rabin rounds run on top of the fixed witnesses during key generation.
///
/// The fixed set alone is not sufficient for random candidates of cryptographic size;
/// 40 rounds bound the error probability by 4^-40.
pub const DEFAULT_MR_ROUNDS: usize = 40;

/// Primes used for cheap trial division before Miller-Rabin.
pub const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];
