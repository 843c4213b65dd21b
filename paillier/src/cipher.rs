//! Encryption, decryption and the additive homomorphism.

use crate::error::PaillierError;
use crate::keys::{PrivateKey, PublicKey, l_function};
use crate::math::gcd;
use crate::wire::decimal;
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An element of `Z*_{n²}` produced under one specific public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ciphertext(BigUint);

impl Serialize for Ciphertext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        decimal::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Ciphertext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decimal::deserialize(deserializer).map(Ciphertext)
    }
}

impl Ciphertext {
    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn into_inner(self) -> BigUint {
        self.0
    }
}

impl PublicKey {
    /// Encrypt `m`, which must lie in `[0, n)`.
    ///
    /// Every call draws fresh randomness `r`, so equal plaintexts encrypt to different ciphertexts.
    pub fn encrypt<R: Rng + ?Sized>(&self, m: &BigInt, rng: &mut R) -> Result<Ciphertext, PaillierError> {
        let m = m
            .to_biguint()
            .filter(|m| m < &self.n)
            .ok_or(PaillierError::Range)?;

        let r = self.sample_unit(rng);
        let c = (self.g.modpow(&m, &self.n_squared) * r.modpow(&self.n, &self.n_squared)) % &self.n_squared;
        Ok(Ciphertext(c))
    }

    pub fn encrypt_u64<R: Rng + ?Sized>(&self, m: u64, rng: &mut R) -> Result<Ciphertext, PaillierError> {
        self.encrypt(&BigInt::from(m), rng)
    }

    /// Uniform `r` in `[1, n)` with `gcd(r, n) = 1` (reject and resample).
    fn sample_unit<R: Rng + ?Sized>(&self, rng: &mut R) -> BigUint {
        loop {
            let r = rng.gen_biguint_below(&self.n);
            if !r.is_zero() && gcd(&r, &self.n).is_one() {
                return r;
            }
        }
    }

    /// `Enc(a) · Enc(b) = Enc(a + b mod n)`.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        Ciphertext((&a.0 * &b.0) % &self.n_squared)
    }

    /// `Enc(m)^k = Enc(k·m mod n)` for a known plaintext constant `k`.
    pub fn scalar_mul(&self, c: &Ciphertext, k: &BigUint) -> Ciphertext {
        Ciphertext(c.0.modpow(k, &self.n_squared))
    }

    /// Homomorphic sum of any number of ciphertexts. The empty sum is `1`, an encryption of zero.
    pub fn sum<'a, I>(&self, ciphertexts: I) -> Ciphertext
    where
        I: IntoIterator<Item = &'a Ciphertext>,
    {
        ciphertexts
            .into_iter()
            .fold(Ciphertext(BigUint::one()), |acc, c| self.add(&acc, c))
    }

    /// Accept a ciphertext value received from elsewhere if it lies in `(0, n²)`.
    pub fn ciphertext(&self, value: BigUint) -> Result<Ciphertext, PaillierError> {
        if value.is_zero() || value >= self.n_squared {
            return Err(PaillierError::InvalidCiphertext);
        }
        Ok(Ciphertext(value))
    }
}

impl PrivateKey {
    /// Recover the plaintext in `[0, n)`.
    ///
    /// The ciphertext must come from the matching public key; that is not checked.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigUint, PaillierError> {
        let public = &self.public;
        let x = c.0.modpow(&self.lambda, &public.n_squared);
        let l = l_function(&x, &public.n).ok_or(PaillierError::InvalidCiphertext)?;
        Ok((l * &self.mu) % &public.n)
    }
}
