//! Random invertible matrices for blinding a shared matrix before it is opened.

use ndarray::Array2;
use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;

use crate::{
    arith::{mod_invert, random_mod_p},
    matrix::determinant,
    randomness::{additive_share_vec, additive_shares, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

#[derive(Clone, Debug)]
pub struct RandomSquareMatrixInfo {
    pub modulus: BigUint,
    pub dim: usize,
}

impl RandomSquareMatrixInfo {
    pub fn new(modulus: BigUint, dim: usize) -> Self {
        Self { modulus, dim }
    }
}

/// One party's share of a random invertible `R` and of `det(R)^-1`.
#[derive(Clone, Debug)]
pub struct RandomSquareMatrix {
    pub values: Array2<BigUint>,
    pub det_of_inverse: BigUint,
}

impl RandomnessInfo for RandomSquareMatrixInfo {
    type Instance = RandomSquareMatrix;

    fn name(&self) -> &'static str {
        "RandomSquareMatrix"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<RandomSquareMatrix> {
        let p = &self.modulus;
        let (matrix, det) = loop {
            let m =
                Array2::from_shape_simple_fn((self.dim, self.dim), || random_mod_p(&mut *rng, p));
            let det = determinant(&m, p);
            if !det.is_zero() {
                break (m, det);
            }
        };
        let det_of_inverse = mod_invert(&det, p).unwrap_or_default();
        let flat: Vec<BigUint> = matrix.iter().cloned().collect();
        let entries = additive_share_vec(rng, &flat, parties, p);
        let dets = additive_shares(rng, &det_of_inverse, parties, p);
        entries
            .into_iter()
            .zip(dets)
            .map(|(entries, det_of_inverse)| RandomSquareMatrix {
                values: Array2::from_shape_vec((self.dim, self.dim), entries)
                    .unwrap_or_else(|_| Array2::zeros((self.dim, self.dim))),
                det_of_inverse,
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &RandomSquareMatrix) {
        for x in instance.values.iter() {
            w.write_elem(x, &self.modulus);
        }
        w.write_elem(&instance.det_of_inverse, &self.modulus);
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<RandomSquareMatrix, WireError> {
        let mut values = Array2::zeros((self.dim, self.dim));
        for x in values.iter_mut() {
            *x = r.read_elem(&self.modulus)?;
        }
        Ok(RandomSquareMatrix {
            values,
            det_of_inverse: r.read_elem(&self.modulus)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arith::mod_mul, randomness::testing::open_additive};

    #[test]
    fn test_shares_open_to_invertible_matrix() {
        let p = BigUint::from(10_007u32);
        let info = RandomSquareMatrixInfo::new(p.clone(), 3);
        let shares = info.generate(4, &mut rand::thread_rng());

        let flat: Vec<Vec<BigUint>> = shares
            .iter()
            .map(|s| s.values.iter().cloned().collect())
            .collect();
        let opened = Array2::from_shape_vec((3, 3), open_additive(&flat, &p)).unwrap();
        let dets: Vec<Vec<BigUint>> = shares
            .iter()
            .map(|s| vec![s.det_of_inverse.clone()])
            .collect();
        let det_of_inverse = open_additive(&dets, &p).remove(0);

        assert_eq!(mod_mul(&determinant(&opened, &p), &det_of_inverse, &p), BigUint::from(1u32));
    }

    #[test]
    fn test_wire_round_trip_preserves_shape() {
        let p = BigUint::from(10_007u32);
        let info = RandomSquareMatrixInfo::new(p, 2);
        let share = info.generate(2, &mut rand::thread_rng()).remove(0);
        let mut w = MessageWriter::new();
        info.write_instance(&mut w, &share);
        let bytes = w.into_bytes();
        let mut r = MessageReader::new(&bytes);
        let read = info.read_instance(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(read.values, share.values);
        assert_eq!(read.det_of_inverse, share.det_of_inverse);
    }
}
