//! Products of shared matrices.

use ndarray::Array2;
use num_bigint::BigUint;
use num_traits::Zero;

use crate::{
    arith::mod_add,
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
};

use super::multiply::{BeaverTriple, Multiply};

/// Number of Beaver triples consumed by an `(n × k) · (k × m)` product.
pub fn triples_needed(n: usize, k: usize, m: usize) -> usize {
    n * k * m
}

/// Shares of `a · b` for shared `a` (`n × k`) and `b` (`k × m`).
/// Completes with `Array2<BigUint>`.
pub struct MatrixMultiply {
    modulus: BigUint,
    a: Array2<BigUint>,
    b: Array2<BigUint>,
    triples: Vec<BeaverTriple>,
    started: bool,
}

impl MatrixMultiply {
    pub fn new(
        modulus: &BigUint,
        a: Array2<BigUint>,
        b: Array2<BigUint>,
        triples: Vec<BeaverTriple>,
    ) -> Self {
        assert_eq!(a.ncols(), b.nrows(), "inner dimensions differ");
        assert_eq!(
            triples.len(),
            triples_needed(a.nrows(), a.ncols(), b.ncols()),
            "one triple per scalar product"
        );
        Self {
            modulus: modulus.clone(),
            a,
            b,
            triples,
            started: false,
        }
    }
}

impl Fronctocol for MatrixMultiply {
    fn name(&self) -> &'static str {
        "MatrixMultiply"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let (n, k, m) = (self.a.nrows(), self.a.ncols(), self.b.ncols());
        match event {
            Event::Init if !self.started => {
                self.started = true;
                // products ordered (i, j, l)
                let mut xs = Vec::with_capacity(n * m * k);
                let mut ys = Vec::with_capacity(n * m * k);
                for i in 0..n {
                    for j in 0..m {
                        for l in 0..k {
                            xs.push(self.a[[i, l]].clone());
                            ys.push(self.b[[l, j]].clone());
                        }
                    }
                }
                let triples = std::mem::take(&mut self.triples);
                Ok(Actions::invoked(
                    Multiply::new(&self.modulus, xs, ys, triples),
                    ctx.peers.clone(),
                ))
            }
            Event::Complete(completion) if self.started => {
                let products = completion.output::<Vec<BigUint>>()?;
                let p = &self.modulus;
                let product = Array2::from_shape_fn((n, m), |(i, j)| {
                    let start = (i * m + j) * k;
                    products[start..start + k]
                        .iter()
                        .fold(BigUint::zero(), |acc, x| mod_add(&acc, x, p))
                });
                Ok(Actions::completed(product))
            }
            event => Err(ProtocolError::unexpected(self.name(), self.started, &event)),
        }
    }
}
