//! Plaintext linear algebra over a prime field.

use ndarray::Array2;
use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::{
    arith::{mod_add, mod_invert, mod_mul, mod_neg, mod_sub},
    fronctocol::ProtocolError,
};

/// Determinant and adjugate (`det · M^-1`) of a square matrix modulo `p`.
///
/// One Gauss-Jordan pass over `[M | I]`: the first row with a non-zero entry in the
/// pivot column becomes the pivot row. A column without a pivot means the matrix is
/// singular.
pub fn determinant_and_adjugate(
    m: &Array2<BigUint>,
    p: &BigUint,
) -> Result<(BigUint, Array2<BigUint>), ProtocolError> {
    let n = m.nrows();
    assert_eq!(n, m.ncols(), "matrix is not square");

    let mut work = m.mapv(|x| x % p);
    let mut inverse = identity(n);
    let mut det = BigUint::one();

    for col in 0..n {
        let pivot = (col..n)
            .find(|&row| !work[[row, col]].is_zero())
            .ok_or(ProtocolError::SingularMatrix)?;
        if pivot != col {
            swap_rows(&mut work, pivot, col);
            swap_rows(&mut inverse, pivot, col);
            det = mod_neg(&det, p);
        }

        let lead = work[[col, col]].clone();
        det = mod_mul(&det, &lead, p);
        let lead_inv = mod_invert(&lead, p).ok_or(ProtocolError::SingularMatrix)?;
        for j in 0..n {
            work[[col, j]] = mod_mul(&work[[col, j]], &lead_inv, p);
            inverse[[col, j]] = mod_mul(&inverse[[col, j]], &lead_inv, p);
        }

        for row in (0..n).filter(|&row| row != col) {
            let factor = work[[row, col]].clone();
            if factor.is_zero() {
                continue;
            }
            for j in 0..n {
                let w = mod_mul(&factor, &work[[col, j]], p);
                work[[row, j]] = mod_sub(&work[[row, j]], &w, p);
                let v = mod_mul(&factor, &inverse[[col, j]], p);
                inverse[[row, j]] = mod_sub(&inverse[[row, j]], &v, p);
            }
        }
    }

    let adjugate = inverse.mapv(|x| mod_mul(&x, &det, p));
    Ok((det, adjugate))
}

/// Determinant modulo `p`, zero for singular matrices.
pub fn determinant(m: &Array2<BigUint>, p: &BigUint) -> BigUint {
    determinant_and_adjugate(m, p).map_or_else(|_| BigUint::zero(), |(det, _)| det)
}

pub fn identity(n: usize) -> Array2<BigUint> {
    Array2::from_shape_fn((n, n), |(i, j)| if i == j { BigUint::one() } else { BigUint::zero() })
}

/// `a · b` modulo `p`.
pub fn mat_mul(a: &Array2<BigUint>, b: &Array2<BigUint>, p: &BigUint) -> Array2<BigUint> {
    assert_eq!(a.ncols(), b.nrows(), "inner dimensions differ");
    Array2::from_shape_fn((a.nrows(), b.ncols()), |(i, j)| {
        (0..a.ncols()).fold(BigUint::zero(), |acc, k| {
            mod_add(&acc, &mod_mul(&a[[i, k]], &b[[k, j]], p), p)
        })
    })
}

fn swap_rows(m: &mut Array2<BigUint>, a: usize, b: usize) {
    for j in 0..m.ncols() {
        m.swap([a, j], [b, j]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::{from_signed, random_mod_p};
    use num_bigint::BigInt;

    fn from_rows(rows: &[&[i64]], p: &BigUint) -> Array2<BigUint> {
        let n = rows.len();
        Array2::from_shape_fn((n, rows[0].len()), |(i, j)| {
            from_signed(&BigInt::from(rows[i][j]), p)
        })
    }

    #[test]
    fn test_small_determinant_and_adjugate() {
        let p = BigUint::from(1_000_003u32);
        let m = from_rows(&[&[2, 1], &[5, 3]], &p);
        let (det, adj) = determinant_and_adjugate(&m, &p).unwrap();
        assert_eq!(det, BigUint::from(1u32));
        assert_eq!(adj, from_rows(&[&[3, -1], &[-5, 2]], &p));
    }

    #[test]
    fn test_pivoting_flips_sign() {
        let p = BigUint::from(101u32);
        let m = from_rows(&[&[0, 1], &[1, 0]], &p);
        let (det, _) = determinant_and_adjugate(&m, &p).unwrap();
        assert_eq!(det, from_signed(&BigInt::from(-1), &p));
    }

    #[test]
    fn test_singular() {
        let p = BigUint::from(101u32);
        let m = from_rows(&[&[1, 2], &[2, 4]], &p);
        assert!(matches!(
            determinant_and_adjugate(&m, &p),
            Err(ProtocolError::SingularMatrix)
        ));
        assert!(determinant(&m, &p).is_zero());
    }

    #[test]
    fn test_adjugate_identity() {
        let p = crate::arith::prime_above_pow2(64);
        let mut rng = rand::thread_rng();
        let m = Array2::from_shape_fn((4, 4), |_| random_mod_p(&mut rng, &p));
        let (det, adj) = determinant_and_adjugate(&m, &p).unwrap();
        let product = mat_mul(&m, &adj, &p);
        assert_eq!(product, identity(4).mapv(|x| mod_mul(&x, &det, &p)));
    }
}
