use std::sync::OnceLock;

use num_bigint::{BigInt, BigUint};
use paillier::KeyPair;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn keys() -> &'static KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(|| {
        let mut rng = ChaCha20Rng::seed_from_u64(0x5eed);
        KeyPair::generate(256, &mut rng).expect("keygen")
    })
}

fn plaintext() -> impl Strategy<Value = BigUint> {
    // 31 bytes stay below a 256-bit modulus.
    prop::collection::vec(any::<u8>(), 0..=31).prop_map(|bytes| BigUint::from_bytes_be(&bytes))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn decrypt_inverts_encrypt(m in plaintext(), seed in any::<u64>()) {
        let keys = keys();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        let c = keys.public.encrypt(&BigInt::from(m.clone()), &mut rng).unwrap();
        prop_assert_eq!(keys.private.decrypt(&c).unwrap(), m);
    }

    #[test]
    fn addition_matches_plaintext_sum(a in plaintext(), b in plaintext(), seed in any::<u64>()) {
        let keys = keys();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        let ca = keys.public.encrypt(&BigInt::from(a.clone()), &mut rng).unwrap();
        let cb = keys.public.encrypt(&BigInt::from(b.clone()), &mut rng).unwrap();
        let sum = keys.public.add(&ca, &cb);

        prop_assert_eq!(keys.private.decrypt(&sum).unwrap(), a + b);
    }

    #[test]
    fn chained_additions_of_counts(values in prop::collection::vec(0u64..1_000_000, 1..12), seed in any::<u64>()) {
        let keys = keys();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        let cts: Vec<_> = values
            .iter()
            .map(|v| keys.public.encrypt_u64(*v, &mut rng).unwrap())
            .collect();
        let total: u64 = values.iter().sum();

        prop_assert_eq!(keys.private.decrypt(&keys.public.sum(&cts)).unwrap(), BigUint::from(total));
    }
}

#[test]
fn fresh_key_pairs_differ() {
    let mut rng = ChaCha20Rng::seed_from_u64(99);
    let a = KeyPair::generate(128, &mut rng).unwrap();
    let b = KeyPair::generate(128, &mut rng).unwrap();
    assert_ne!(a.public.n(), b.public.n());
}

#[test]
fn ciphertext_from_other_key_does_not_decrypt_to_plaintext() {
    let mut rng = ChaCha20Rng::seed_from_u64(100);
    let a = KeyPair::generate(128, &mut rng).unwrap();
    let b = KeyPair::generate(128, &mut rng).unwrap();

    let c = a.public.encrypt_u64(4_242, &mut rng).unwrap();
    let wrong = b.private.decrypt(&c).map(|m| m == BigUint::from(4_242u32)).unwrap_or(false);
    assert!(!wrong);
}
