//! Interpolated prefix-or polynomials.
//!
//! A sum of `ell` bits plus one lies in `1..=ell + 1`. The polynomial built here maps
//! 1 to 0 and every other point of that range to 1, turning "is any bit set" into a
//! polynomial evaluation.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::arith::{mod_add, mod_invert, mod_mul, mod_neg, mod_sub};

/// Coefficients (constant term first) of the degree-`ell` polynomial over `Z_p` with
/// `P(1) = 0` and `P(2) = ... = P(ell + 1) = 1`.
///
/// Returns `None` if the interpolation points are not distinct modulo `p`.
pub fn prefix_or_coefficients(p: &BigUint, ell: usize) -> Option<Vec<BigUint>> {
    let points: Vec<BigUint> = (1..=ell as u64 + 1).map(|j| BigUint::from(j) % p).collect();

    // N(x) = prod_j (x - j)
    let mut product = vec![BigUint::one()];
    for j in &points {
        let mut next = vec![BigUint::zero(); product.len() + 1];
        for (k, coeff) in product.iter().enumerate() {
            next[k + 1] = mod_add(&next[k + 1], coeff, p);
            next[k] = mod_sub(&next[k], &mod_mul(j, coeff, p), p);
        }
        product = next;
    }

    let mut coeffs = vec![BigUint::zero(); ell + 1];
    for (i, xi) in points.iter().enumerate().skip(1) {
        // N(x) / (x - xi) by synthetic division
        let mut quotient = vec![BigUint::zero(); ell + 1];
        quotient[ell] = product[ell + 1].clone();
        for k in (1..=ell).rev() {
            quotient[k - 1] = mod_add(&product[k], &mod_mul(xi, &quotient[k], p), p);
        }

        let denominator = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .fold(BigUint::one(), |acc, (_, xj)| mod_mul(&acc, &mod_sub(xi, xj, p), p));
        let scale = mod_invert(&denominator, p)?;

        for (c, q) in coeffs.iter_mut().zip(&quotient) {
            *c = mod_add(c, &mod_mul(q, &scale, p), p);
        }
    }
    Some(coeffs)
}

/// Horner evaluation of `coeffs` at `x` modulo `p`.
pub fn evaluate(coeffs: &[BigUint], x: &BigUint, p: &BigUint) -> BigUint {
    coeffs
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, c| mod_add(&mod_mul(&acc, x, p), c, p))
}

/// Negated coefficients, for callers that need `1 - P(x)`.
pub fn complement(coeffs: &[BigUint], p: &BigUint) -> Vec<BigUint> {
    let mut out: Vec<BigUint> = coeffs.iter().map(|c| mod_neg(c, p)).collect();
    if let Some(c0) = out.first_mut() {
        *c0 = mod_add(c0, &BigUint::one(), p);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(s: u32, ell: usize) {
        let p = BigUint::from(s);
        let coeffs = prefix_or_coefficients(&p, ell).unwrap();
        assert_eq!(coeffs.len(), ell + 1);
        assert_eq!(evaluate(&coeffs, &BigUint::one(), &p), BigUint::zero());
        for x in 2..=ell as u32 + 1 {
            assert_eq!(
                evaluate(&coeffs, &BigUint::from(x), &p),
                BigUint::one(),
                "s={} ell={} x={}",
                s,
                ell,
                x
            );
        }
    }

    #[test]
    fn test_prefix_or_small_field() {
        for ell in 1..11 {
            check(11, ell);
        }
    }

    #[test]
    fn test_prefix_or_509() {
        for ell in [1, 2, 7, 64, 200, 508] {
            check(509, ell);
        }
    }

    #[test]
    fn test_complement() {
        let p = BigUint::from(509u32);
        let coeffs = complement(&prefix_or_coefficients(&p, 5).unwrap(), &p);
        assert_eq!(evaluate(&coeffs, &BigUint::one(), &p), BigUint::one());
        assert_eq!(evaluate(&coeffs, &BigUint::from(4u32), &p), BigUint::zero());
    }

    #[test]
    fn test_colliding_points() {
        assert!(prefix_or_coefficients(&BigUint::from(5u32), 5).is_none());
    }
}
