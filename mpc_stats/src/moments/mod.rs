//! Count, mean, variance and skew of one column over the joined rows.
//!
//! Data-vertical rows carry `[1, X, X², …, X^h]` with `X` the fixed-point value;
//! the other vertical carries `[1, 0, …]`. Reducing a matched pair multiplies
//! left and right entries, so the join sums are `[n, ΣX, …, ΣX^h]`. Those are
//! lifted to a wider modulus and divided by the count before the recipient sees
//! them. Each quotient carries [`MomentsInfo::guard_bits`] fractional bits beyond
//! the scale of its sum, so the recipient's `E[X²] - E[X]²` does not amplify the
//! truncation of `E[X]`.

mod protocol;
mod receiver;

pub use protocol::Moments;
pub use receiver::MomentsReceiver;

use mpc::{
    arith::{from_signed, prime_above_pow2},
    protocols::{
        compare::CompareInfo,
        divide::{DivideInfo, SignedDivideInfo},
        modconv::ModConvUpInfo,
        multiply::TripleBundleInfo,
    },
    ProtocolError,
};
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};
use serde::Serialize;

use crate::{
    fixed_point::bounded_fixed,
    global::GlobalInfo,
    house::RandomnessOrder,
    join::{JoinInfo, JoinRow},
    payload::PayloadCompute,
};

/// Parameters of one moments query, identical at every party.
#[derive(Clone, Debug)]
pub struct MomentsInfo {
    pub highest_moment: usize,
    pub reveal_count: bool,
    /// fractional bits of the column values
    pub bits: usize,
    pub value_bits: usize,
    pub start_modulus: BigUint,
    pub end_modulus: BigUint,
    /// extra fractional bits of every `E[X^k]`
    pub guard_bits: usize,
    /// quotient bits of each `E[X^k]`
    pub quotient_bits: usize,
    pub join: JoinInfo,
    pub modconv: ModConvUpInfo,
    pub divide: DivideInfo,
}

impl MomentsInfo {
    pub fn new(
        global: &GlobalInfo,
        highest_moment: usize,
        reveal_count: bool,
        num_join_keys: usize,
        verticals: (u32, u32),
        data_vertical: u32,
    ) -> Result<Self, ProtocolError> {
        let h = highest_moment;
        let b = global.bits_of_precision;
        let v = global.value_bits;
        let n_bits = global.intersection_bits();

        let start_bits = (2 + h * (b + v) + n_bits).max(8);
        // central moments multiply E[X] by up to h - 1 values of magnitude 2^v
        let guard_bits = h.saturating_sub(1) * v + b + 2;
        let quotient_bits = h * (v + b) + guard_bits + 1;
        let end_bits = (start_bits + 2).max(n_bits + quotient_bits + 3);
        let start_modulus = prime_above_pow2(start_bits);
        let end_modulus = prime_above_pow2(end_bits);

        let join = JoinInfo::new(
            global,
            num_join_keys,
            verticals,
            data_vertical,
            &start_modulus,
            h + 1,
        )?;
        let modconv = ModConvUpInfo::new(&start_modulus, &end_modulus)?;
        let divide = DivideInfo::new(CompareInfo::new(&end_modulus)?);
        Ok(Self {
            highest_moment: h,
            reveal_count: reveal_count || h == 0,
            bits: b,
            value_bits: v,
            guard_bits,
            start_modulus,
            end_modulus,
            quotient_bits,
            join,
            modconv,
            divide,
        })
    }

    pub fn factory(&self) -> PayloadCompute {
        let products = (0..=self.highest_moment).map(|k| (0, k)).collect();
        PayloadCompute::new(self.start_modulus.clone(), products)
    }

    pub fn join_randomness(&self) -> TripleBundleInfo {
        TripleBundleInfo::new(self.start_modulus.clone(), self.highest_moment + 1)
    }

    /// Randomness of the steps after the join, in the order it is consumed.
    pub fn randomness_order(&self) -> RandomnessOrder {
        let h = self.highest_moment;
        RandomnessOrder::new()
            .request(self.modconv.clone(), h + 1)
            .request(
                SignedDivideInfo {
                    divide: self.divide.clone(),
                },
                h,
            )
            .request(self.divide.clone(), h * self.quotient_bits)
    }

    /// Join rows of a data-vertical owner: powers of each value.
    pub fn data_rows(
        &self,
        keys: Vec<BigUint>,
        values: &[f64],
    ) -> Result<Vec<JoinRow>, ProtocolError> {
        let p = &self.start_modulus;
        keys.into_iter()
            .zip(values)
            .map(|(key, &x)| {
                let fixed = bounded_fixed(x, self.bits, self.value_bits).ok_or_else(|| {
                    ProtocolError::Invalid(format!("{} is outside ±2^{}", x, self.value_bits))
                })?;
                let mut power = BigInt::one();
                let mut payload = Vec::with_capacity(self.highest_moment + 1);
                for _ in 0..=self.highest_moment {
                    payload.push(from_signed(&power, p));
                    power *= &fixed;
                }
                Ok(JoinRow { key, payload })
            })
            .collect()
    }

    /// Join rows of an owner of the other vertical: a bare indicator.
    pub fn indicator_rows(&self, keys: Vec<BigUint>) -> Vec<JoinRow> {
        keys.into_iter()
            .map(|key| {
                let mut payload = vec![BigUint::zero(); self.highest_moment + 1];
                payload[0] = BigUint::one();
                JoinRow { key, payload }
            })
            .collect()
    }

    /// Number of elements each data owner sends the recipient.
    pub fn result_len(&self) -> usize {
        usize::from(self.reveal_count) + self.highest_moment
    }

    /// Fractional bits of the revealed `E[X^k]`.
    pub fn expectation_bits(&self, k: usize) -> usize {
        k * self.bits + self.guard_bits
    }
}

/// What the recipient learns. Statistics beyond the query's highest moment are absent.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MomentsResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpc::arith::{bit_length, to_signed};

    fn moments_info(h: usize) -> MomentsInfo {
        let mut global = GlobalInfo::new(8, 3);
        global.bits_of_precision = 3;
        global.value_bits = 4;
        global.key_max = 50;
        MomentsInfo::new(&global, h, false, 1, (0, 1), 1).unwrap()
    }

    #[test]
    fn test_moduli() {
        let info = moments_info(3);
        // 3 · 7 bits of X^3 plus the count bits, signed
        assert_eq!(bit_length(&info.start_modulus), 2 + 21 + 5 + 1);
        assert_eq!(info.guard_bits, 2 * 4 + 3 + 2);
        assert_eq!(info.quotient_bits, 21 + 13 + 1);
        assert_eq!(info.expectation_bits(1), 3 + 13);
        assert_eq!(info.expectation_bits(3), 9 + 13);
        assert!(info.end_modulus > info.start_modulus);
        assert!(!info.reveal_count);
        assert_eq!(info.result_len(), 3);
        assert_eq!(info.join.width(), 4);
        assert_eq!(info.factory().products(), [(0, 0), (0, 1), (0, 2), (0, 3)]);

        let count = moments_info(0);
        assert!(count.reveal_count);
        assert_eq!(count.result_len(), 1);
        assert_eq!(count.randomness_order().summary()[1], ("SignedDivide", 0));
    }

    #[test]
    fn test_rows() {
        let info = moments_info(2);
        let rows = info
            .data_rows(vec![BigUint::from(4u32)], &[-1.5])
            .unwrap();
        let p = &info.start_modulus;
        let payload: Vec<BigInt> = rows[0].payload.iter().map(|x| to_signed(x, p)).collect();
        assert_eq!(payload, vec![BigInt::from(1), BigInt::from(-12), BigInt::from(144)]);
        assert!(info.data_rows(vec![BigUint::zero()], &[16.0]).is_err());

        let rows = info.indicator_rows(vec![BigUint::from(9u32)]);
        assert_eq!(rows[0].payload, vec![BigUint::one(), BigUint::zero(), BigUint::zero()]);
    }
}
