//! Number-theoretic helpers used by key generation and encryption.

use crate::constants::{MR_WITNESSES, SMALL_PRIMES};
use crate::error::PaillierError;
use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use rand::Rng;

pub fn gcd(a: &BigUint, b: &BigUint) -> BigUint {
    a.gcd(b)
}

/// `|a·b| / gcd(a, b)`, with `lcm(0, x) = 0`.
pub fn lcm(a: &BigUint, b: &BigUint) -> BigUint {
    if a.is_zero() || b.is_zero() {
        return BigUint::zero();
    }
    (a * b) / gcd(a, b)
}

/// Modular inverse via the extended Euclidean algorithm.
///
/// Returns `t` in `[0, n)` with `a·t ≡ 1 (mod n)`.
pub fn mod_inverse(a: &BigUint, n: &BigUint) -> Result<BigUint, PaillierError> {
    if n.is_zero() {
        return Err(PaillierError::NoInverse);
    }

    let modulus = BigInt::from_biguint(Sign::Plus, n.clone());

    let (mut t, mut new_t) = (BigInt::zero(), BigInt::one());
    let (mut r, mut new_r) = (modulus.clone(), BigInt::from_biguint(Sign::Plus, a % n));

    while !new_r.is_zero() {
        let q = &r / &new_r;

        let next_t = &t - &q * &new_t;
        t = std::mem::replace(&mut new_t, next_t);

        let next_r = &r - &q * &new_r;
        r = std::mem::replace(&mut new_r, next_r);
    }

    if !r.is_one() {
        return Err(PaillierError::NoInverse);
    }
    if t.is_negative() {
        t += &modulus;
    }

    t.to_biguint().ok_or(PaillierError::NoInverse)
}

/// Probabilistic primality test.
///
/// Trial division by small primes, then Miller-Rabin over the fixed witness set, then
/// `extra_rounds` rounds with uniformly random bases.
pub fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, extra_rounds: usize, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }

    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n is odd and larger than every small prime from here on.
    let n_minus_one = n - BigUint::one();
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    for w in MR_WITNESSES {
        if !miller_rabin_round(n, &n_minus_one, &d, s, &BigUint::from(w)) {
            return false;
        }
    }

    for _ in 0..extra_rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        if !miller_rabin_round(n, &n_minus_one, &d, s, &a) {
            return false;
        }
    }

    true
}

/// One Miller-Rabin round for `n - 1 = d·2^s` and base `a`. `true` means "probably prime".
fn miller_rabin_round(n: &BigUint, n_minus_one: &BigUint, d: &BigUint, s: u64, a: &BigUint) -> bool {
    let mut x = a.modpow(d, n);
    if x.is_one() || &x == n_minus_one {
        return true;
    }

    for _ in 1..s {
        x = (&x * &x) % n;
        if &x == n_minus_one {
            return true;
        }
    }

    false
}

/// Sample a probable prime of exactly `bits` bits.
///
/// Candidates are odd with the two top bits forced set, so the product of two such primes has
/// exactly `2 * bits` bits. Sampling retries until a candidate passes.
pub fn random_prime<R: Rng + ?Sized>(
    bits: u64,
    extra_rounds: usize,
    rng: &mut R,
) -> Result<BigUint, PaillierError> {
    if bits < 2 {
        return Err(PaillierError::InvalidKeySize { bits, min: 2 });
    }

    let top = BigUint::from(3u8) << (bits - 2);
    loop {
        let candidate = rng.gen_biguint(bits) | &top | BigUint::one();
        if is_probable_prime(&candidate, extra_rounds, rng) {
            return Ok(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn lcm_matches_definition() {
        assert_eq!(lcm(&big(4), &big(6)), big(12));
        assert_eq!(lcm(&big(7), &big(13)), big(91));
        assert_eq!(lcm(&big(0), &big(13)), big(0));
        assert_eq!(gcd(&big(84), &big(36)), big(12));
    }

    #[test]
    fn mod_inverse_recovers_identity() {
        let inv = mod_inverse(&big(3), &big(11)).unwrap();
        assert_eq!(inv, big(4));

        let n = big(1_000_000_007);
        for a in [2u64, 17, 999_999_999, 123_456_789] {
            let inv = mod_inverse(&big(a), &n).unwrap();
            assert_eq!((big(a) * inv) % &n, big(1));
        }
    }

    #[test]
    fn mod_inverse_rejects_shared_factor() {
        assert_eq!(mod_inverse(&big(6), &big(9)), Err(PaillierError::NoInverse));
        assert_eq!(mod_inverse(&big(0), &big(9)), Err(PaillierError::NoInverse));
    }

    #[test]
    fn primality_on_known_values() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);

        for p in [2u64, 3, 97, 101, 7919, 1_000_000_007, 2_305_843_009_213_693_951] {
            assert!(is_probable_prime(&big(p), 8, &mut rng), "{p} should be prime");
        }
        for c in [0u64, 1, 4, 91, 561, 1_373_653, 3_215_031_751, 1_000_000_007 * 3] {
            assert!(!is_probable_prime(&big(c), 8, &mut rng), "{c} should be composite");
        }
    }

    #[test]
    fn strong_pseudoprime_to_fixed_witnesses_needs_random_rounds() {
        // 3825123056546413051 passes Miller-Rabin for every base up to 23.
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let spsp = big(3_825_123_056_546_413_051);
        assert!(is_probable_prime(&spsp, 0, &mut rng));
        assert!(!is_probable_prime(&spsp, 40, &mut rng));
    }

    #[test]
    fn random_prime_has_exact_bit_length() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        for bits in [8u64, 32, 64, 128] {
            let p = random_prime(bits, 16, &mut rng).unwrap();
            assert_eq!(p.bits(), bits);
            assert!(p.bit(bits - 2), "second-highest bit must be set");
            assert!(p.is_odd());
        }
        assert!(matches!(
            random_prime(1, 16, &mut rng),
            Err(PaillierError::InvalidKeySize { bits: 1, .. })
        ));
    }
}
