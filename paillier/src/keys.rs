//! Paillier key material.
//!
//! A `PrivateKey` is deliberately neither `Clone` nor serializable: the party that runs key
//! generation owns it and drops it when its session ends.

use crate::constants::{DEFAULT_MR_ROUNDS, MIN_KEY_BITS};
use crate::error::PaillierError;
use crate::math::{lcm, mod_inverse, random_prime};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use std::fmt;

/// Public half of a key pair: `n`, `n²` and the generator `g = n + 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub(crate) n: BigUint,
    pub(crate) n_squared: BigUint,
    pub(crate) g: BigUint,
}

impl PublicKey {
    fn new_unchecked(n: BigUint) -> Self {
        let n_squared = &n * &n;
        let g = &n + BigUint::one();
        Self { n, n_squared, g }
    }

    /// Rebuild a public key from a modulus received over the wire.
    ///
    /// Only structural checks are possible here: `n` must be odd and at least as large as the
    /// smallest modulus `KeyPair::generate` produces.
    pub fn from_modulus(n: BigUint) -> Result<Self, PaillierError> {
        if n.is_even() {
            return Err(PaillierError::InvalidModulus("modulus must be odd".to_string()));
        }
        if n.bits() < MIN_KEY_BITS {
            return Err(PaillierError::InvalidModulus(format!(
                "modulus has {} bits, expected at least {MIN_KEY_BITS}",
                n.bits()
            )));
        }
        Ok(Self::new_unchecked(n))
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn n_squared(&self) -> &BigUint {
        &self.n_squared
    }

    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Bit length of the modulus.
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }
}

/// Secret half: Carmichael value `lambda` and the precomputed `mu`.
pub struct PrivateKey {
    pub(crate) lambda: BigUint,
    pub(crate) mu: BigUint,
    pub(crate) public: PublicKey,
}

impl PrivateKey {
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bits", &self.public.bits())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair with a `bits`-bit modulus.
    ///
    /// `p` and `q` are independent, distinct probable primes of `bits / 2` bits each.
    pub fn generate<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> Result<Self, PaillierError> {
        if bits < MIN_KEY_BITS || bits % 2 != 0 {
            return Err(PaillierError::InvalidKeySize { bits, min: MIN_KEY_BITS });
        }

        let half = bits / 2;
        let p = random_prime(half, DEFAULT_MR_ROUNDS, rng)?;
        let mut q = random_prime(half, DEFAULT_MR_ROUNDS, rng)?;
        while q == p {
            q = random_prime(half, DEFAULT_MR_ROUNDS, rng)?;
        }

        let one = BigUint::one();
        let n = &p * &q;
        let lambda = lcm(&(&p - &one), &(&q - &one));
        let public = PublicKey::new_unchecked(n);

        let x = public.g.modpow(&lambda, &public.n_squared);
        let l = l_function(&x, &public.n).ok_or(PaillierError::KeyGen)?;
        let mu = mod_inverse(&l, &public.n).map_err(|_| PaillierError::KeyGen)?;

        Ok(Self {
            private: PrivateKey { lambda, mu, public: public.clone() },
            public,
        })
    }
}

/// `L(x) = (x - 1) / n`. `None` for `x = 0`, which no valid ciphertext power produces.
pub(crate) fn l_function(x: &BigUint, n: &BigUint) -> Option<BigUint> {
    if x.is_zero() {
        return None;
    }
    Some((x - BigUint::one()) / n)
}
