//! Fixed-point encoding of real values as residues.
//!
//! A value `x` at `b` fractional bits is the integer `round(x · 2^b)`; negative
//! integers are stored as `p - |X|`.

use mpc::arith::{from_signed, to_signed};
use num_bigint::{BigInt, BigUint};
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

/// `round(x · 2^bits)`, rounding half away from zero. `None` for non-finite input.
pub fn to_fixed(x: f64, bits: usize) -> Option<BigInt> {
    if !x.is_finite() {
        return None;
    }
    let magnitude = (x.abs() * 2f64.powi(bits as i32) + 0.5).floor();
    let magnitude = BigInt::from_f64(magnitude)?;
    Some(if x < 0.0 { -magnitude } else { magnitude })
}

/// [`to_fixed`] for values with `|x| < 2^value_bits`; `None` outside that range.
pub fn bounded_fixed(x: f64, bits: usize, value_bits: usize) -> Option<BigInt> {
    to_fixed(x, bits).filter(|v| v.magnitude().bits() as usize <= value_bits + bits)
}

/// Residue of `round(x · 2^bits)` modulo `p`.
pub fn encode(x: f64, bits: usize, p: &BigUint) -> Option<BigUint> {
    to_fixed(x, bits).map(|v| from_signed(&v, p))
}

/// Real value of a residue holding a signed integer scaled by `2^bits`.
pub fn decode(x: &BigUint, bits: usize, p: &BigUint) -> f64 {
    scaled_to_f64(&to_signed(x, p), bits)
}

/// `x / 2^bits` as a float.
pub fn scaled_to_f64(x: &BigInt, bits: usize) -> f64 {
    if x.is_zero() {
        return 0.0;
    }
    // shift large values down first so the float conversion keeps its precision
    let excess = (x.bits() as usize).saturating_sub(f64::MANTISSA_DIGITS as usize + 8);
    let shift = excess.min(bits);
    let reduced: BigInt = if x.is_negative() {
        -((-x) >> shift)
    } else {
        x >> shift
    };
    let mantissa = reduced.to_f64().unwrap_or(f64::NAN);
    mantissa * 2f64.powi(-((bits - shift) as i32))
}

/// Fraction encoded by little-endian `bytes` as a multiple of `2^-(8·len)`.
pub fn bytes_to_fraction(bytes: &[u8]) -> f64 {
    let value = bytes
        .iter()
        .rev()
        .fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
    value as f64 / 2f64.powi(8 * bytes.len() as i32)
}

/// Little-endian encoding of `floor(q · 2^(8·cell_bytes))`, saturating at the top.
pub fn fraction_to_bytes(q: f64, cell_bytes: usize) -> Vec<u8> {
    let scale = 2f64.powi(8 * cell_bytes as i32);
    let max = if cell_bytes >= 16 {
        u128::MAX
    } else {
        (1u128 << (8 * cell_bytes)) - 1
    };
    // float-to-int casts saturate, NaN becomes 0
    let value = ((q.clamp(0.0, 1.0) * scale).floor() as u128).min(max);
    (0..cell_bytes)
        .map(|i| (value >> (8 * i)) as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpc::arith::prime_above_pow2;
    use proptest::prelude::*;

    #[test]
    fn test_rounding() {
        assert_eq!(to_fixed(1.5, 2), Some(BigInt::from(6)));
        assert_eq!(to_fixed(0.1, 5), Some(BigInt::from(3)));
        assert_eq!(to_fixed(-0.1, 5), Some(BigInt::from(-3)));
        assert_eq!(to_fixed(-2.0, 0), Some(BigInt::from(-2)));
        assert_eq!(to_fixed(f64::NAN, 3), None);
        assert_eq!(to_fixed(f64::INFINITY, 3), None);
    }

    #[test]
    fn test_bounded() {
        assert_eq!(bounded_fixed(3.5, 2, 2), Some(BigInt::from(14)));
        assert_eq!(bounded_fixed(-3.7, 1, 2), Some(BigInt::from(-7)));
        assert_eq!(bounded_fixed(4.0, 2, 2), None);
        assert_eq!(bounded_fixed(-4.0, 0, 2), None);
    }

    #[test]
    fn test_negative_encoding() {
        let p = BigUint::from(1_000_003u32);
        assert_eq!(encode(-1.0, 3, &p), Some(&p - 8u32));
        assert_eq!(decode(&(&p - 8u32), 3, &p), -1.0);
    }

    #[test]
    fn test_table_cells() {
        assert_eq!(fraction_to_bytes(0.5, 2), vec![0x00, 0x80]);
        assert_eq!(fraction_to_bytes(1.0, 2), vec![0xff, 0xff]);
        assert_eq!(fraction_to_bytes(-0.3, 1), vec![0]);
        assert_eq!(bytes_to_fraction(&[0x00, 0x80]), 0.5);
        assert_eq!(bytes_to_fraction(&[0x00, 0x40, 0x00, 0x00]), 16384.0 / 4294967296.0);
    }

    #[test]
    fn test_decode_wide_values() {
        let p = prime_above_pow2(400);
        let x = BigInt::from(3) << 300usize;
        let residue = from_signed(&-x, &p);
        assert_eq!(decode(&residue, 299, &p), -6.0);
    }

    proptest! {
        #[test]
        fn prop_round_trip(x in -1.0e6f64..1.0e6, bits in 0usize..20) {
            let p = prime_above_pow2(64);
            let encoded = encode(x, bits, &p).unwrap();
            let decoded = decode(&encoded, bits, &p);
            prop_assert!((decoded - x).abs() <= 2f64.powi(-(bits as i32)));
        }
    }
}
