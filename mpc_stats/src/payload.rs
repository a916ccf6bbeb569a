//! Per-pair reduction of joined rows into the products a query aggregates.

use std::sync::Arc;

use mpc::{
    protocols::{
        multiply::{BeaverTriple, Multiply, TripleBundleInfo},
        zip::ZipReduceFactory,
    },
    Fronctocol,
};
use num_bigint::BigUint;

/// Products `left[a] · right[b]` of a matched pair, one per entry of `products`.
///
/// Left rows come from the vertical sorted first within a match, right rows from
/// the data vertical.
#[derive(Clone, Debug)]
pub struct PayloadCompute {
    modulus: BigUint,
    products: Arc<Vec<(usize, usize)>>,
}

impl PayloadCompute {
    pub fn new(modulus: BigUint, products: Vec<(usize, usize)>) -> Self {
        Self {
            modulus,
            products: Arc::new(products),
        }
    }

    pub fn products(&self) -> &[(usize, usize)] {
        &self.products
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }
}

impl ZipReduceFactory for PayloadCompute {
    type Info = TripleBundleInfo;

    fn randomness_info(&self) -> TripleBundleInfo {
        TripleBundleInfo::new(self.modulus.clone(), self.products.len())
    }

    fn output_len(&self) -> usize {
        self.products.len()
    }

    fn reduce(
        &self,
        left: Vec<BigUint>,
        right: Vec<BigUint>,
        triples: Vec<BeaverTriple>,
    ) -> Box<dyn Fronctocol> {
        let (xs, ys) = self
            .products
            .iter()
            .map(|&(a, b)| (left[a].clone(), right[b].clone()))
            .unzip();
        Box::new(Multiply::new(&self.modulus, xs, ys, triples))
    }
}
