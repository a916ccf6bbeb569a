//! Rows of shared data as they flow through sorting and joining.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::{
    arith::{mod_add, mod_mul},
    fronctocol::ProtocolError,
};

/// One row: key columns, arithmetic payload and XOR payload, all as shares.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    pub keys: Vec<BigUint>,
    pub arithmetic: Vec<BigUint>,
    pub xor: Vec<bool>,
}

impl Observation {
    pub fn new(keys: Vec<BigUint>, arithmetic: Vec<BigUint>, xor: Vec<bool>) -> Self {
        Self {
            keys,
            arithmetic,
            xor,
        }
    }

    /// All-zero row, i.e. the share held by a party that does not own the row.
    pub fn zeros(num_keys: usize, num_arithmetic: usize, num_xor: usize) -> Self {
        Self {
            keys: vec![BigUint::zero(); num_keys],
            arithmetic: vec![BigUint::zero(); num_arithmetic],
            xor: vec![false; num_xor],
        }
    }

    /// Keys `k_0..k_{m-1}` folded into `Σ k_c · base^(m-1-c)`, which orders rows
    /// lexicographically while every key is below `base`.
    pub fn composite_key(&self, take: usize, base: &BigUint, p: &BigUint) -> BigUint {
        self.keys[..take]
            .iter()
            .fold(BigUint::zero(), |acc, k| mod_add(&mod_mul(&acc, base, p), k, p))
    }
}

/// Homogeneous list of observations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservationList {
    num_keys: usize,
    num_arithmetic: usize,
    num_xor: usize,
    rows: Vec<Observation>,
}

impl ObservationList {
    pub fn new(num_keys: usize, num_arithmetic: usize, num_xor: usize) -> Self {
        Self {
            num_keys,
            num_arithmetic,
            num_xor,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(
        num_keys: usize,
        num_arithmetic: usize,
        num_xor: usize,
        rows: Vec<Observation>,
    ) -> Result<Self, ProtocolError> {
        let mut list = Self::new(num_keys, num_arithmetic, num_xor);
        for row in rows {
            list.push(row)?;
        }
        Ok(list)
    }

    pub fn push(&mut self, row: Observation) -> Result<(), ProtocolError> {
        if row.keys.len() != self.num_keys
            || row.arithmetic.len() != self.num_arithmetic
            || row.xor.len() != self.num_xor
        {
            return Err(ProtocolError::Invalid(format!(
                "row shape ({}, {}, {}) does not match list shape ({}, {}, {})",
                row.keys.len(),
                row.arithmetic.len(),
                row.xor.len(),
                self.num_keys,
                self.num_arithmetic,
                self.num_xor
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append `count` all-zero rows.
    pub fn pad_zeros(&mut self, count: usize) {
        let zero = Observation::zeros(self.num_keys, self.num_arithmetic, self.num_xor);
        self.rows.extend(std::iter::repeat(zero).take(count));
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    pub fn num_arithmetic(&self) -> usize {
        self.num_arithmetic
    }

    pub fn num_xor(&self) -> usize {
        self.num_xor
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Observation] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Observation> {
        self.rows
    }
}
