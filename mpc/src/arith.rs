//! Arithmetic over runtime prime moduli.
//!
//! Every share handled by the engine is a residue in `[0, p)` stored as a [`BigUint`].
//! The helpers below assume operands are already reduced and keep results reduced.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use rand::Rng;

/// Bases used by the Miller-Rabin test before falling back to random witnesses.
const MILLER_RABIN_BASES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Random witnesses tried on top of the fixed bases.
const MILLER_RABIN_RANDOM_ROUNDS: usize = 8;

/// `(a + b) mod p`.
pub fn mod_add(a: &BigUint, b: &BigUint, p: &BigUint) -> BigUint {
    let sum = a + b;
    if &sum >= p {
        sum - p
    } else {
        sum
    }
}

/// `(a - b) mod p`.
pub fn mod_sub(a: &BigUint, b: &BigUint, p: &BigUint) -> BigUint {
    if a >= b {
        a - b
    } else {
        p - (b - a)
    }
}

/// `-a mod p`.
pub fn mod_neg(a: &BigUint, p: &BigUint) -> BigUint {
    if a.is_zero() {
        BigUint::zero()
    } else {
        p - a
    }
}

/// `(a * b) mod p`.
pub fn mod_mul(a: &BigUint, b: &BigUint, p: &BigUint) -> BigUint {
    (a * b) % p
}

/// Multiplicative inverse of `a` modulo `p` by the extended Euclidean algorithm.
///
/// Returns `None` when `gcd(a, p) != 1`.
pub fn mod_invert(a: &BigUint, p: &BigUint) -> Option<BigUint> {
    let p_signed = BigInt::from(p.clone());
    let (mut r0, mut r1) = (p_signed.clone(), BigInt::from(a % p));
    let (mut t0, mut t1) = (BigInt::zero(), BigInt::one());

    while !r1.is_zero() {
        let q = &r0 / &r1;
        let r2 = &r0 - &q * &r1;
        let t2 = &t0 - &q * &t1;
        r0 = std::mem::replace(&mut r1, r2);
        t0 = std::mem::replace(&mut t1, t2);
    }

    if !r0.is_one() {
        return None;
    }
    t0.mod_floor(&p_signed).to_biguint()
}

/// Uniform element of `[0, p)` by rejection sampling over `bits(p)`-bit candidates.
pub fn random_mod_p<R: Rng + ?Sized>(rng: &mut R, p: &BigUint) -> BigUint {
    let bits = p.bits();
    loop {
        let candidate = rng.gen_biguint(bits);
        if &candidate < p {
            return candidate;
        }
    }
}

/// Uniform element of `[1, p)`.
pub fn random_nonzero_mod_p<R: Rng + ?Sized>(rng: &mut R, p: &BigUint) -> BigUint {
    loop {
        let candidate = random_mod_p(rng, p);
        if !candidate.is_zero() {
            return candidate;
        }
    }
}

/// Number of bits needed to write `x`.
pub fn bit_length(x: &BigUint) -> usize {
    x.bits() as usize
}

/// Bit `i` of `x` (least significant first).
pub fn bit(x: &BigUint, i: usize) -> bool {
    x.bit(i as u64)
}

/// `2^k` as a big integer.
pub fn pow2(k: usize) -> BigUint {
    BigUint::one() << k
}

/// Interprets a residue as a signed integer in `(-p/2, p/2]`.
pub fn to_signed(x: &BigUint, p: &BigUint) -> BigInt {
    if x * 2u32 > *p {
        BigInt::from(x.clone()) - BigInt::from(p.clone())
    } else {
        BigInt::from(x.clone())
    }
}

/// Reduces a signed integer into `[0, p)`.
pub fn from_signed(x: &BigInt, p: &BigUint) -> BigUint {
    let p_signed = BigInt::from(p.clone());
    x.mod_floor(&p_signed)
        .to_biguint()
        .unwrap_or_else(BigUint::zero)
}

/// Probabilistic primality test (trial division, then Miller-Rabin).
pub fn is_probable_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    for base in MILLER_RABIN_BASES {
        let base = BigUint::from(base);
        if n == &base {
            return true;
        }
        if (n % &base).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let mut d = n_minus_one.clone();
    let mut s = 0u32;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    let witness = |a: &BigUint| -> bool {
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            return true;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_one {
                return true;
            }
        }
        false
    };

    if !MILLER_RABIN_BASES
        .iter()
        .all(|&base| witness(&BigUint::from(base)))
    {
        return false;
    }

    let mut rng = rand::thread_rng();
    let upper = n - 2u32;
    (0..MILLER_RABIN_RANDOM_ROUNDS).all(|_| {
        let a = rng.gen_biguint_range(&two, &upper);
        witness(&a)
    })
}

/// Smallest prime strictly greater than `n`.
pub fn next_prime(n: &BigUint) -> BigUint {
    let two = BigUint::from(2u32);
    if n < &two {
        return two;
    }
    let mut candidate = n + 1u32;
    if candidate.is_even() {
        if candidate == two {
            return candidate;
        }
        candidate += 1u32;
    }
    while !is_probable_prime(&candidate) {
        candidate += 2u32;
    }
    candidate
}

/// Smallest prime above `2^bits`.
pub fn prime_above_pow2(bits: usize) -> BigUint {
    next_prime(&pow2(bits))
}

/// `ceil(log2(x))` for `x >= 1`.
pub fn ceil_log2(x: usize) -> usize {
    match x {
        0 | 1 => 0,
        _ => (usize::BITS - (x - 1).leading_zeros()) as usize,
    }
}

/// Signed magnitude check used by tests and receivers.
pub fn abs_signed(x: &BigUint, p: &BigUint) -> BigUint {
    to_signed(x, p).abs().to_biguint().unwrap_or_else(BigUint::zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_invert_small_prime() {
        for s in [11u32, 509] {
            let p = BigUint::from(s);
            for i in 1..s {
                let i = BigUint::from(i);
                let inv = mod_invert(&i, &p).unwrap();
                assert_eq!(mod_mul(&i, &inv, &p), BigUint::one());
            }
        }
    }

    #[test]
    fn test_invert_non_coprime() {
        assert_eq!(mod_invert(&BigUint::from(6u32), &BigUint::from(9u32)), None);
        assert_eq!(mod_invert(&BigUint::zero(), &BigUint::from(11u32)), None);
    }

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(&BigUint::from(10u32)), BigUint::from(11u32));
        assert_eq!(next_prime(&BigUint::from(11u32)), BigUint::from(13u32));
        assert_eq!(next_prime(&BigUint::from(100u32)), BigUint::from(101u32));
        assert_eq!(next_prime(&BigUint::from(256u32)), BigUint::from(257u32));
        assert!(is_probable_prime(&prime_above_pow2(127)));
        assert!(!is_probable_prime(&BigUint::from(561u32)));
    }

    #[test]
    fn test_signed_conversion() {
        let p = BigUint::from(101u32);
        assert_eq!(to_signed(&BigUint::from(100u32), &p), BigInt::from(-1));
        assert_eq!(to_signed(&BigUint::from(50u32), &p), BigInt::from(50));
        assert_eq!(from_signed(&BigInt::from(-3), &p), BigUint::from(98u32));
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(16), 4);
        assert_eq!(ceil_log2(17), 5);
    }

    proptest! {
        #[test]
        fn prop_invert_roundtrip(a in 1u64..u64::MAX) {
            let p = prime_above_pow2(64);
            let a = BigUint::from(a);
            let inv = mod_invert(&a, &p).unwrap();
            prop_assert_eq!(mod_mul(&a, &inv, &p), BigUint::one());
        }

        #[test]
        fn prop_add_sub_inverse(a in 0u32..1_000_003, b in 0u32..1_000_003) {
            let p = BigUint::from(1_000_003u32);
            let (a, b) = (BigUint::from(a), BigUint::from(b));
            prop_assert_eq!(mod_sub(&mod_add(&a, &b, &p), &b, &p), a);
        }
    }
}
