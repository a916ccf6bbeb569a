//! Ordinary least squares over the joined rows, with R², MSE, standard errors
//! and p-values from the F and t tables.
//!
//! The join yields shares of `XᵀX` and `Xᵀy`. `XᵀX` is blinded by a dealer-made
//! random matrix `R` and opened, so every data owner inverts `R·XᵀX` in the clear
//! and unblinds with `det(R)⁻¹`. Every later division pre-multiplies by a power of
//! two to keep fractional bits.

mod layout;
mod protocol;
mod receiver;

pub use layout::{Assembled, Layout, Regressor};
pub use protocol::Regression;
pub use receiver::RegressionReceiver;

use mpc::{
    arith::{ceil_log2, prime_above_pow2},
    protocols::{
        compare::CompareInfo,
        divide::{DivideInfo, SignedDivideInfo},
        lookup::LookupInfo,
        modconv::ModConvUpInfo,
        multiply::{BeaverInfo, TripleBundleInfo},
        square_matrix::RandomSquareMatrixInfo,
        typecast::TypeCastInfo,
    },
    ProtocolError,
};
use num_bigint::BigUint;
use serde::Serialize;
use tracing::debug;

use crate::{
    global::GlobalInfo, house::RandomnessOrder, join::JoinInfo, payload::PayloadCompute,
    table::StatTable,
};

/// Quotient bits of every division of a regression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotientBits {
    pub coefficient: usize,
    pub mse: usize,
    pub r_squared: usize,
    pub variance: usize,
    pub t_index: usize,
    pub f_index: usize,
}

/// Parameters of one regression query, identical at every party.
#[derive(Clone, Debug)]
pub struct RegressionInfo {
    pub layout: Layout,
    /// regressor names, in design-matrix order
    pub names: Vec<String>,
    pub bits: usize,
    pub value_bits: usize,
    pub start_modulus: BigUint,
    pub end_modulus: BigUint,
    pub quotient_bits: QuotientBits,
    pub join: JoinInfo,
    pub modconv: ModConvUpInfo,
    pub divide: DivideInfo,
    pub f_table: StatTable,
    pub t_table: StatTable,
    pub f_lookup: LookupInfo,
    pub t_lookup: LookupInfo,
}

/// Bits of `x`, zero for zero.
fn bits_of(x: u64) -> usize {
    (u64::BITS - x.leading_zeros()) as usize
}

impl RegressionInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        global: &GlobalInfo,
        layout: Layout,
        names: Vec<String>,
        num_join_keys: usize,
        verticals: (u32, u32),
        data_vertical: u32,
        f_table: StatTable,
        t_table: StatTable,
    ) -> Result<Self, ProtocolError> {
        let d = layout.dim();
        if d == 0 {
            return Err(ProtocolError::Invalid("regression without regressors".to_string()));
        }
        if names.len() != d {
            return Err(ProtocolError::Invalid(format!(
                "{} names for {} regressors",
                names.len(),
                d
            )));
        }
        let b = global.bits_of_precision;
        let v = global.value_bits;
        let n = global.intersection_bits();
        let log_d = ceil_log2(d);

        // |XᵀX| and |Xᵀy| entries at scale 2^2b
        let e = 2 * (b + v) + n;
        let start_bits = (e + 3).max(8);
        let det_bits = d * (e + log_d + 1);

        let quotient_bits = QuotientBits {
            coefficient: 2 * v + b + 2,
            mse: e + 3 * b + 1,
            r_squared: b + 2,
            variance: e + 3 * b + 1 + e + 1,
            t_index: bits_of(t_table.num_cols() as u64) + 1,
            f_index: bits_of(f_table.num_cols() as u64) + 1,
        };
        let q = quotient_bits;
        let sse_bits = (e + 2 * b)
            .max(b + 1 + q.coefficient + e + log_d)
            .max(2 * q.coefficient + e + 2 * log_d)
            + 2;
        let explained_bits = (n + e + 2 * b).max(n + sse_bits) + 1;
        let t_step_bits = bits_of(t_table.step_size());
        let f_step_bits = bits_of(layout.num_indep_vars() as u64 * f_table.step_size());

        let end_bits = [
            det_bits + b.max(q.coefficient) + 2,
            q.coefficient + e + log_d + 1,
            2 * q.coefficient + e + 2 * log_d + 1,
            2 * q.coefficient + det_bits,
            q.mse + det_bits,
            explained_bits + b,
            q.r_squared + n + e + 2 * b + 1,
            q.mse + det_bits + b,
            q.variance + det_bits,
            2 * q.coefficient + det_bits + b + t_table.bits_of_precision(),
            q.mse + det_bits + t_step_bits + q.t_index,
            explained_bits + n + f_table.bits_of_precision(),
            n + sse_bits + f_step_bits + q.f_index,
            start_bits + 2,
            66,
        ]
        .into_iter()
        .max()
        .unwrap_or(66)
            + 2;
        debug!(start_bits, end_bits, det_bits, "regression moduli");

        let start_modulus = prime_above_pow2(start_bits);
        let end_modulus = prime_above_pow2(end_bits);
        let join = JoinInfo::new(
            global,
            num_join_keys,
            verticals,
            data_vertical,
            &start_modulus,
            layout.width(),
        )?;
        let modconv = ModConvUpInfo::new(&start_modulus, &end_modulus)?;
        let compare = CompareInfo::new(&end_modulus)?;
        let f_lookup = LookupInfo::new(compare.clone(), f_table.cells().len());
        let t_lookup = LookupInfo::new(compare.clone(), t_table.cells().len());
        Ok(Self {
            layout,
            names,
            bits: b,
            value_bits: v,
            start_modulus,
            end_modulus,
            quotient_bits,
            join,
            modconv,
            divide: DivideInfo::new(compare),
            f_table,
            t_table,
            f_lookup,
            t_lookup,
        })
    }

    pub fn dim(&self) -> usize {
        self.layout.dim()
    }

    pub fn factory(&self) -> PayloadCompute {
        PayloadCompute::new(self.start_modulus.clone(), self.layout.products().to_vec())
    }

    pub fn join_randomness(&self) -> TripleBundleInfo {
        TripleBundleInfo::new(self.start_modulus.clone(), self.layout.products().len())
    }

    pub fn num_triples(&self) -> usize {
        let d = self.dim();
        // blinded product, unblinding, first and second products, c·SSE,
        // N_R·(n - d), MSE·a_ii, clamping of the table columns
        d * d * (d + 1) + 2 * d + (d * d + 2 * d + 2) + 2 * d + 1 + 1 + d + (d + 1)
    }

    pub fn num_signed_divisions(&self) -> usize {
        2 * self.dim() + 2
    }

    pub fn num_divide_steps(&self) -> usize {
        let d = self.dim();
        let q = &self.quotient_bits;
        d * q.coefficient + q.mse + q.r_squared + d * q.variance + d * q.t_index + q.f_index
    }

    /// Column bounds of the d t indices and the F index, then the row thresholds
    /// of the t and F tables.
    pub fn num_comparisons(&self) -> usize {
        (self.dim() + 1) + (self.t_table.num_rows() - 1) + (self.f_table.num_rows() - 1)
    }

    /// Randomness of the steps after the join, in the order it is consumed.
    pub fn randomness_order(&self) -> RandomnessOrder {
        let compare = self.divide.compare.clone();
        RandomnessOrder::new()
            .request(self.modconv.clone(), self.layout.products().len())
            .request(BeaverInfo::new(self.end_modulus.clone()), self.num_triples())
            .request(RandomSquareMatrixInfo::new(self.end_modulus.clone(), self.dim()), 1)
            .request(
                SignedDivideInfo {
                    divide: self.divide.clone(),
                },
                self.num_signed_divisions(),
            )
            .request(self.divide.clone(), self.num_divide_steps())
            .request(compare, self.num_comparisons())
            .request(TypeCastInfo::new(self.end_modulus.clone()), self.num_comparisons())
            .request(self.f_lookup.clone(), 1)
            .request(self.t_lookup.clone(), self.dim())
    }

    /// Field elements each data owner sends the recipient: coefficients, MSE, R²
    /// and squared standard errors.
    pub fn result_len(&self) -> usize {
        2 * self.dim() + 2
    }
}

/// What the recipient learns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegressionResult {
    pub regressors: Vec<String>,
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub t_p_values: Vec<f64>,
    pub mse: f64,
    pub r_squared: f64,
    pub f_p_value: f64,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mpc::arith::bit_length;

    pub const F_TABLE: &str = "#bits_of_precision=2\n#step_size=1\n\
        1,0.9,0.7,0.5,0.3\n\
        4,0.8,0.5,0.3,0.1\n\
        10,0.7,0.4,0.2,0.05\n";

    pub const T_TABLE: &str = "#bits_of_precision=2\n#step_size=2\n\
        1,0.45,0.35,0.25\n\
        5,0.4,0.3,0.1\n";

    pub fn tables() -> (StatTable, StatTable) {
        (
            StatTable::parse(F_TABLE, "f.csv", 2, 10).unwrap(),
            StatTable::parse(T_TABLE, "t.csv", 2, 10).unwrap(),
        )
    }

    fn info(regressors: Vec<Regressor>) -> RegressionInfo {
        let mut global = GlobalInfo::new(6, 2);
        global.bits_of_precision = 2;
        global.value_bits = 3;
        global.key_max = 40;
        let names = regressors.iter().map(|r| format!("{:?}", r)).collect();
        let (f, t) = tables();
        RegressionInfo::new(&global, Layout::new(regressors), names, 1, (0, 1), 1, f, t).unwrap()
    }

    #[test]
    fn test_counts() {
        let info = info(vec![Regressor::Intercept, Regressor::Left(0)]);
        assert_eq!(info.dim(), 2);
        assert_eq!(info.num_triples(), 12 + 4 + 10 + 4 + 2 + 2 + 3);
        assert_eq!(info.num_signed_divisions(), 6);
        assert_eq!(info.num_comparisons(), 3 + 1 + 2);
        assert_eq!(info.result_len(), 6);
        assert_eq!(info.quotient_bits.t_index, 3);
        assert_eq!(info.quotient_bits.f_index, 4);
        assert_eq!(info.randomness_order().len(), 9);
        assert!(bit_length(&info.end_modulus) > 66);
        assert!(info.end_modulus > info.start_modulus);
    }

    #[test]
    fn test_reject_mismatched_names() {
        let mut global = GlobalInfo::new(6, 2);
        global.key_max = 40;
        let (f, t) = tables();
        let layout = Layout::new(vec![Regressor::Intercept]);
        assert!(RegressionInfo::new(&global, layout, vec![], 1, (0, 1), 1, f, t).is_err());
    }
}
