//! Payload columns of a regression join and how their sums form `XᵀX`, `Xᵀy`.
//!
//! Rows of the vertical without the dependent variable ("left") are
//! `[1, x…, xᵢ·xⱼ (i ≤ j)]`. Rows of the dependent variable's vertical ("right")
//! are `[1, y, y², x…, xₖ·xₘ (k ≤ m), xₖ·y]`. A matched pair reduces to products
//! `left[a] · right[b]`, and every entry of `XᵀX` and `Xᵀy` is the sum of one such
//! product over the joined rows.

use ndarray::Array2;
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};

use mpc::arith::{from_signed, mod_mul, pow2};

/// One column of the design matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regressor {
    Intercept,
    /// i-th regressor held with the left vertical
    Left(usize),
    /// i-th regressor held with the dependent variable
    Right(usize),
}

const RIGHT_Y: usize = 1;
const RIGHT_Y2: usize = 2;

/// Index of `(i, j)`, `i ≤ j < n`, in the row-major upper triangle.
fn pair_index(i: usize, j: usize, n: usize) -> usize {
    let (i, j) = (i.min(j), i.max(j));
    i * n - i * (i + 1) / 2 + j
}

/// A product `left[a] · right[b]` scaled by `2^(shift · bits)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Term {
    product: usize,
    shift: usize,
}

/// Join sums after the shifts that bring them to a common scale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assembled {
    /// `XᵀX` at scale `2^(2b)`
    pub a: Array2<BigUint>,
    /// `Xᵀy` at scale `2^(2b)`
    pub v: Vec<BigUint>,
    /// `Σy²` at scale `2^(2b)`
    pub y2: BigUint,
    /// `Σy` at scale `2^b`
    pub ysum: BigUint,
    /// number of joined rows
    pub count: BigUint,
}

#[derive(Clone, Debug)]
pub struct Layout {
    regressors: Vec<Regressor>,
    num_left: usize,
    num_right: usize,
    products: Vec<(usize, usize)>,
    a_terms: Vec<Term>,
    v_terms: Vec<Term>,
    y2: Term,
    ysum: Term,
    count: Term,
}

impl Layout {
    pub fn new(regressors: Vec<Regressor>) -> Self {
        let num_left = regressors.iter().filter(|r| matches!(r, Regressor::Left(_))).count();
        let num_right = regressors.iter().filter(|r| matches!(r, Regressor::Right(_))).count();
        let mut layout = Self {
            regressors,
            num_left,
            num_right,
            products: Vec::new(),
            a_terms: Vec::new(),
            v_terms: Vec::new(),
            y2: Term { product: 0, shift: 0 },
            ysum: Term { product: 0, shift: 0 },
            count: Term { product: 0, shift: 0 },
        };

        let d = layout.dim();
        for i in 0..d {
            for j in i..d {
                let (left, right, shift) = layout.cross(layout.regressors[i], layout.regressors[j]);
                let term = layout.term(left, right, shift);
                layout.a_terms.push(term);
            }
        }
        for i in 0..d {
            let (left, right, shift) = match layout.regressors[i] {
                Regressor::Intercept => (0, RIGHT_Y, 1),
                Regressor::Left(a) => (layout.left_x(a), RIGHT_Y, 0),
                Regressor::Right(a) => (0, layout.right_xy(a), 0),
            };
            let term = layout.term(left, right, shift);
            layout.v_terms.push(term);
        }
        layout.y2 = layout.term(0, RIGHT_Y2, 0);
        layout.ysum = layout.term(0, RIGHT_Y, 0);
        layout.count = layout.term(0, 0, 0);
        layout
    }

    fn term(&mut self, left: usize, right: usize, shift: usize) -> Term {
        let product = match self.products.iter().position(|p| *p == (left, right)) {
            Some(i) => i,
            None => {
                self.products.push((left, right));
                self.products.len() - 1
            }
        };
        Term { product, shift }
    }

    /// Product and shift giving the `XᵀX` entry of two regressors.
    fn cross(&self, x: Regressor, y: Regressor) -> (usize, usize, usize) {
        use Regressor::*;
        match (x, y) {
            (Intercept, Intercept) => (0, 0, 2),
            (Intercept, Left(a)) | (Left(a), Intercept) => (self.left_x(a), 0, 1),
            (Intercept, Right(a)) | (Right(a), Intercept) => (0, self.right_x(a), 1),
            (Left(a), Left(c)) => (self.left_pair(a, c), 0, 0),
            (Right(a), Right(c)) => (0, self.right_pair(a, c), 0),
            (Left(a), Right(c)) | (Right(c), Left(a)) => (self.left_x(a), self.right_x(c), 0),
        }
    }

    fn left_x(&self, i: usize) -> usize {
        1 + i
    }

    fn left_pair(&self, i: usize, j: usize) -> usize {
        1 + self.num_left + pair_index(i, j, self.num_left)
    }

    fn right_x(&self, i: usize) -> usize {
        3 + i
    }

    fn right_pair(&self, i: usize, j: usize) -> usize {
        3 + self.num_right + pair_index(i, j, self.num_right)
    }

    fn right_xy(&self, i: usize) -> usize {
        let r = self.num_right;
        3 + r + r * (r + 1) / 2 + i
    }

    pub fn regressors(&self) -> &[Regressor] {
        &self.regressors
    }

    /// Number of regressors, the intercept included.
    pub fn dim(&self) -> usize {
        self.regressors.len()
    }

    pub fn has_intercept(&self) -> bool {
        self.regressors.contains(&Regressor::Intercept)
    }

    /// Regressors excluding the intercept.
    pub fn num_indep_vars(&self) -> usize {
        self.num_left + self.num_right
    }

    pub fn num_left(&self) -> usize {
        self.num_left
    }

    pub fn num_right(&self) -> usize {
        self.num_right
    }

    /// Products each matched pair reduces to.
    pub fn products(&self) -> &[(usize, usize)] {
        &self.products
    }

    /// Payload width shared by both verticals.
    pub fn width(&self) -> usize {
        let l = self.num_left;
        let r = self.num_right;
        (1 + l + l * (l + 1) / 2).max(3 + r + r * (r + 1) / 2 + r)
    }

    /// Payload of a left row from fixed-point regressor values.
    pub fn left_row(&self, xs: &[BigInt], p: &BigUint) -> Vec<BigUint> {
        assert_eq!(xs.len(), self.num_left, "one value per left regressor");
        let mut row = vec![BigInt::one()];
        row.extend(xs.iter().cloned());
        for i in 0..xs.len() {
            for j in i..xs.len() {
                row.push(&xs[i] * &xs[j]);
            }
        }
        self.pad(row, p)
    }

    /// Payload of a right row from fixed-point dependent and regressor values.
    pub fn right_row(&self, y: &BigInt, xs: &[BigInt], p: &BigUint) -> Vec<BigUint> {
        assert_eq!(xs.len(), self.num_right, "one value per right regressor");
        let mut row = vec![BigInt::one(), y.clone(), y * y];
        row.extend(xs.iter().cloned());
        for i in 0..xs.len() {
            for j in i..xs.len() {
                row.push(&xs[i] * &xs[j]);
            }
        }
        row.extend(xs.iter().map(|x| x * y));
        self.pad(row, p)
    }

    fn pad(&self, row: Vec<BigInt>, p: &BigUint) -> Vec<BigUint> {
        let mut row: Vec<BigUint> = row.iter().map(|x| from_signed(x, p)).collect();
        row.resize(self.width(), BigUint::zero());
        row
    }

    /// Shares of `XᵀX`, `Xᵀy` and the `y` sums from shares of the product sums.
    pub fn assemble(&self, sums: &[BigUint], bits: usize, p: &BigUint) -> Assembled {
        assert_eq!(sums.len(), self.products.len(), "one sum per product");
        let value = |t: &Term| mod_mul(&sums[t.product], &pow2(t.shift * bits), p);

        let d = self.dim();
        let mut a = Array2::from_elem((d, d), BigUint::zero());
        let mut terms = self.a_terms.iter();
        for i in 0..d {
            for j in i..d {
                if let Some(t) = terms.next() {
                    let x = value(t);
                    a[[j, i]] = x.clone();
                    a[[i, j]] = x;
                }
            }
        }
        Assembled {
            a,
            v: self.v_terms.iter().map(value).collect(),
            y2: value(&self.y2),
            ysum: value(&self.ysum),
            count: value(&self.count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpc::arith::{prime_above_pow2, to_signed};

    fn fixed(xs: &[i64]) -> Vec<BigInt> {
        xs.iter().map(|x| BigInt::from(*x)).collect()
    }

    #[test]
    fn test_pair_index() {
        let n = 3;
        let mut seen = Vec::new();
        for i in 0..n {
            for j in i..n {
                seen.push(pair_index(i, j, n));
            }
        }
        assert_eq!(seen, (0..6).collect::<Vec<_>>());
        assert_eq!(pair_index(2, 0, 3), pair_index(0, 2, 3));
    }

    /// Plaintext join of left and right rows by position must give `XᵀX`, `Xᵀy`.
    #[test]
    fn test_assemble_matches_normal_equations() {
        use Regressor::*;
        let p = prime_above_pow2(64);
        let bits = 1;
        let layout = Layout::new(vec![Intercept, Left(0), Right(0), Left(1)]);
        assert_eq!(layout.dim(), 4);
        assert_eq!(layout.num_indep_vars(), 3);
        assert_eq!(layout.width(), 6);

        // values already scaled by 2^bits
        let left = [fixed(&[2, 6]), fixed(&[-4, 1]), fixed(&[3, 3])];
        let right = [
            (BigInt::from(5), fixed(&[1])),
            (BigInt::from(-2), fixed(&[8])),
            (BigInt::from(7), fixed(&[-3])),
        ];

        let mut sums = vec![BigUint::zero(); layout.products().len()];
        for (xl, (y, xr)) in left.iter().zip(&right) {
            let l = layout.left_row(xl, &p);
            let r = layout.right_row(y, xr, &p);
            assert_eq!(l.len(), layout.width());
            for (sum, (a, b)) in sums.iter_mut().zip(layout.products()) {
                *sum = (&*sum + mod_mul(&l[*a], &r[*b], &p)) % &p;
            }
        }
        let assembled = layout.assemble(&sums, bits, &p);

        // design rows [2^b, xl0, xr0, xl1] at scale 2^b
        let rows: Vec<Vec<BigInt>> = left
            .iter()
            .zip(&right)
            .map(|(xl, (_, xr))| vec![BigInt::from(2), xl[0].clone(), xr[0].clone(), xl[1].clone()])
            .collect();
        for i in 0..4 {
            for j in 0..4 {
                let expected: BigInt = rows.iter().map(|r| &r[i] * &r[j]).sum();
                assert_eq!(to_signed(&assembled.a[[i, j]], &p), expected, "A[{}][{}]", i, j);
            }
            let expected: BigInt = rows.iter().zip(&right).map(|(r, (y, _))| &r[i] * y).sum();
            assert_eq!(to_signed(&assembled.v[i], &p), expected, "v[{}]", i);
        }
        assert_eq!(to_signed(&assembled.y2, &p), BigInt::from(25 + 4 + 49));
        assert_eq!(to_signed(&assembled.ysum, &p), BigInt::from(10));
        assert_eq!(assembled.count, BigUint::from(3u32));
    }

    #[test]
    fn test_products_are_shared() {
        let layout = Layout::new(vec![Regressor::Intercept, Regressor::Right(0)]);
        // count and the intercept entry use the same product, as do Σy and its v entry
        assert_eq!(layout.products().len(), 6);
        assert!(layout.has_intercept());
        assert_eq!(layout.width(), 6);
        let layout = Layout::new(vec![Regressor::Left(0)]);
        assert!(!layout.has_intercept());
        assert_eq!(layout.width(), 3);
    }
}
