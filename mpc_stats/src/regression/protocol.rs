use mpc::{
    arith::{mod_add, mod_mul, mod_sub, pow2},
    fronctocol::downcast,
    matrix::{determinant_and_adjugate, mat_mul},
    protocols::{
        batch::Batch,
        compare::{Compare, CompareRandomness},
        divide::{Divide, DivideStepRandomness, SignedDivide, SignedDivideRandomness},
        lookup::{Lookup, LookupRandomness},
        matrix_multiply::{triples_needed, MatrixMultiply},
        modconv::{ModConvUp, ModConvUpRandomness},
        multiply::{BeaverTriple, Multiply},
        reveal::Reveal,
        square_matrix::RandomSquareMatrix,
        typecast::{DaBit, TypeCastFromBit},
    },
    wire::MessageWriter,
    Actions, Context, Dispenser, Event, Fronctocol, Output, PeerSet, ProtocolError,
};
use ndarray::{s, Array2};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use tracing::{debug, info, warn};

use super::{Assembled, RegressionInfo};
use crate::{
    house::{computing_peers, Delivery},
    join::{JoinRow, PairwiseJoin},
};

const RANDOMNESS_TAG: usize = 0;
const JOIN_TAG: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingRandomnessAndJoin,
    AwaitingModConvUp,
    AwaitingBlindedProduct,
    AwaitingReveal,
    AwaitingUnblind,
    AwaitingCoefficients,
    AwaitingFirstProducts,
    AwaitingSecondProducts,
    AwaitingScaledResidual,
    AwaitingErrorVariance,
    AwaitingScaledVariances,
    AwaitingDivisions,
    AwaitingCompare,
    AwaitingTypeCast,
    AwaitingClamp,
    AwaitingLookup,
}

/// Randomness of one regression, split by kind.
struct Randomness {
    modconv: Vec<ModConvUpRandomness>,
    triples: Dispenser<BeaverTriple>,
    blinding: RandomSquareMatrix,
    signs: Dispenser<SignedDivideRandomness>,
    steps: Dispenser<DivideStepRandomness>,
    compare: Vec<CompareRandomness>,
    typecast: Vec<DaBit>,
    f_lookup: Vec<LookupRandomness>,
    t_lookup: Vec<LookupRandomness>,
}

impl Randomness {
    fn take(mut delivery: Delivery) -> Result<Self, ProtocolError> {
        Ok(Self {
            modconv: delivery.next::<ModConvUpRandomness>()?.into_vec(),
            triples: delivery.next::<BeaverTriple>()?,
            blinding: delivery.next::<RandomSquareMatrix>()?.take_one(),
            signs: delivery.next::<SignedDivideRandomness>()?,
            steps: delivery.next::<DivideStepRandomness>()?,
            compare: delivery.next::<CompareRandomness>()?.into_vec(),
            typecast: delivery.next::<DaBit>()?.into_vec(),
            f_lookup: delivery.next::<LookupRandomness>()?.into_vec(),
            t_lookup: delivery.next::<LookupRandomness>()?.into_vec(),
        })
    }
}

/// Shared intermediates, filled in as the states advance.
#[derive(Default)]
struct Work {
    data: Option<Assembled>,
    blinded_v: Vec<BigUint>,
    /// `det(XᵀX)` at scale `2^(2b·d)`
    det: BigUint,
    /// diagonal of the adjugate of `XᵀX`
    adj_diag: Vec<BigUint>,
    beta: Vec<BigUint>,
    beta_sq: Vec<BigUint>,
    beta_sq_det: Vec<BigUint>,
    sse: BigUint,
    explained_denominator: BigUint,
    explained: BigUint,
    scaled_sse: BigUint,
    dof: BigUint,
    explained_dof: BigUint,
    mse: BigUint,
    mse_adj: Vec<BigUint>,
    r_squared: BigUint,
    variances: Vec<BigUint>,
    /// t indices, then the F index
    indices: Vec<BigUint>,
    less_than: Vec<BigUint>,
}

/// Data-owner root of a regression query. Sends its shares of the coefficients,
/// MSE, R², squared standard errors and p-value cells to the recipients and
/// completes with `()`.
pub struct Regression {
    info: RegressionInfo,
    rows: Vec<JoinRow>,
    delivery: Option<Delivery>,
    sums: Option<Vec<BigUint>>,
    randomness: Option<Randomness>,
    work: Work,
    state: State,
}

impl Regression {
    pub fn new(info: RegressionInfo, rows: Vec<JoinRow>) -> Self {
        Self {
            info,
            rows,
            delivery: None,
            sums: None,
            randomness: None,
            work: Work::default(),
            state: State::Init,
        }
    }

    fn p(&self) -> &BigUint {
        &self.info.end_modulus
    }

    fn randomness(&mut self) -> Result<&mut Randomness, ProtocolError> {
        self.randomness
            .as_mut()
            .ok_or_else(|| ProtocolError::Invalid("regression randomness missing".to_string()))
    }

    fn data(&self) -> Result<&Assembled, ProtocolError> {
        self.work
            .data
            .as_ref()
            .ok_or_else(|| ProtocolError::Invalid("regression sums missing".to_string()))
    }

    fn triples(&mut self, n: usize) -> Result<Vec<BeaverTriple>, ProtocolError> {
        Ok(self.randomness()?.triples.take(n))
    }

    fn multiply(&mut self, x: Vec<BigUint>, y: Vec<BigUint>) -> Result<Multiply, ProtocolError> {
        let triples = self.triples(x.len())?;
        Ok(Multiply::new(self.p(), x, y, triples))
    }

    fn signed_divide(
        &mut self,
        numerators: Vec<BigUint>,
        denominators: Vec<BigUint>,
        quotient_bits: usize,
    ) -> Result<SignedDivide, ProtocolError> {
        let n = numerators.len();
        let randomness = self.randomness()?;
        let signs = randomness.signs.take(n);
        let steps = randomness.steps.take(n * quotient_bits);
        Ok(SignedDivide::new(
            &self.info.divide,
            quotient_bits,
            numerators,
            denominators,
            signs,
            steps,
        ))
    }

    fn divide(
        &mut self,
        numerators: Vec<BigUint>,
        denominators: Vec<BigUint>,
        quotient_bits: usize,
    ) -> Result<Divide, ProtocolError> {
        let steps = self.randomness()?.steps.take(numerators.len() * quotient_bits);
        Ok(Divide::new(&self.info.divide, quotient_bits, numerators, denominators, steps))
    }

    fn scaled(&self, x: &BigUint, bits: usize) -> BigUint {
        mod_mul(x, &pow2(bits), self.p())
    }

    fn sum(&self, xs: &[BigUint]) -> BigUint {
        xs.iter().fold(BigUint::zero(), |acc, x| mod_add(&acc, x, self.p()))
    }

    fn on_join(&mut self, ctx: &Context<'_>, sums: Vec<BigUint>) -> Result<Actions, ProtocolError> {
        let delivery = self
            .delivery
            .take()
            .ok_or_else(|| ProtocolError::Invalid("regression randomness missing".to_string()))?;
        let mut randomness = Randomness::take(delivery)?;
        let modconv = std::mem::take(&mut randomness.modconv);
        self.randomness = Some(randomness);
        self.state = State::AwaitingModConvUp;
        Ok(Actions::invoked(
            ModConvUp::new(&self.info.modconv, sums, modconv),
            ctx.peers.data_owners_only(),
        ))
    }

    /// Blind `[XᵀX | Xᵀy]` with `R`.
    fn on_converted(
        &mut self,
        ctx: &Context<'_>,
        sums: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let data = self.info.layout.assemble(&sums, self.info.bits, self.p());
        let d = self.info.dim();
        let mut system = Array2::from_elem((d, d + 1), BigUint::zero());
        system.slice_mut(s![.., ..d]).assign(&data.a);
        for (i, v) in data.v.iter().enumerate() {
            system[[i, d]] = v.clone();
        }
        self.work.data = Some(data);

        let blinding = self.randomness()?.blinding.values.clone();
        let triples = self.triples(triples_needed(d, d, d + 1))?;
        self.state = State::AwaitingBlindedProduct;
        Ok(Actions::invoked(
            MatrixMultiply::new(self.p(), blinding, system, triples),
            ctx.peers.data_owners_only(),
        ))
    }

    /// Open `R·XᵀX`; `R·Xᵀy` stays shared.
    fn on_blinded(
        &mut self,
        ctx: &Context<'_>,
        product: Array2<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        self.work.blinded_v = product.column(d).to_vec();
        let blinded: Vec<BigUint> = product.slice(s![.., ..d]).iter().cloned().collect();
        self.state = State::AwaitingReveal;
        Ok(Actions::invoked(
            Reveal::additive(self.p(), blinded),
            ctx.peers.data_owners_only(),
        ))
    }

    /// Invert the opened matrix and unblind with `det(R)⁻¹`.
    fn on_revealed(
        &mut self,
        ctx: &Context<'_>,
        opened: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        let p = self.p().clone();
        let m = Array2::from_shape_vec((d, d), opened)
            .map_err(|e| ProtocolError::Invalid(e.to_string()))?;
        let (det, adj) = determinant_and_adjugate(&m, &p)?;
        debug!("blinded matrix inverted");

        let blinded_v = Array2::from_shape_vec((d, 1), std::mem::take(&mut self.work.blinded_v))
            .map_err(|e| ProtocolError::Invalid(e.to_string()))?;
        // adj(M)·R·Xᵀy = det(R)·adj(XᵀX)·Xᵀy and adj(M)·R = det(R)·adj(XᵀX)
        let u = mat_mul(&adj, &blinded_v, &p);
        let blinding = self.randomness()?.blinding.clone();
        let w = mat_mul(&adj, &blinding.values, &p);

        let delta = blinding.det_of_inverse;
        self.work.det = mod_mul(&det, &delta, &p);
        let x = vec![delta; 2 * d];
        let mut y: Vec<BigUint> = u.iter().cloned().collect();
        y.extend((0..d).map(|i| w[[i, i]].clone()));
        let multiply = self.multiply(x, y)?;
        self.state = State::AwaitingUnblind;
        Ok(Actions::invoked(multiply, ctx.peers.data_owners_only()))
    }

    /// `β = adj(XᵀX)·Xᵀy · 2^b / det(XᵀX)`.
    fn on_unblinded(
        &mut self,
        ctx: &Context<'_>,
        mut products: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        self.work.adj_diag = products.split_off(d);
        let numerators = products.iter().map(|w| self.scaled(w, self.info.bits)).collect();
        let denominators = vec![self.work.det.clone(); d];
        let divide = self.signed_divide(
            numerators,
            denominators,
            self.info.quotient_bits.coefficient,
        )?;
        self.state = State::AwaitingCoefficients;
        Ok(Actions::invoked(divide, ctx.peers.data_owners_only()))
    }

    /// `βᵢvᵢ`, `Aᵢⱼβⱼ`, `n·Σy²`, `(Σy)²`, `βᵢ²`.
    fn on_coefficients(
        &mut self,
        ctx: &Context<'_>,
        beta: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        let data = self.data()?;
        let mut x = beta.clone();
        let mut y = data.v.clone();
        for i in 0..d {
            for j in 0..d {
                x.push(data.a[[i, j]].clone());
                y.push(beta[j].clone());
            }
        }
        x.extend([data.count.clone(), data.ysum.clone()]);
        y.extend([data.y2.clone(), data.ysum.clone()]);
        x.extend(beta.iter().cloned());
        y.extend(beta.iter().cloned());
        self.work.beta = beta;
        let multiply = self.multiply(x, y)?;
        self.state = State::AwaitingFirstProducts;
        Ok(Actions::invoked(multiply, ctx.peers.data_owners_only()))
    }

    /// `βᵢ(Aβ)ᵢ` and `βᵢ²·det`.
    fn on_first_products(
        &mut self,
        ctx: &Context<'_>,
        products: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        let b = self.info.bits;
        let p = self.p().clone();
        let beta_v = self.sum(&products[..d]);
        let a_beta: Vec<BigUint> = products[d..d + d * d]
            .chunks(d)
            .map(|row| self.sum(row))
            .collect();
        let count_y2 = products[d + d * d].clone();
        let ysum_sq = products[d + d * d + 1].clone();
        self.work.beta_sq = products[d + d * d + 2..].to_vec();

        let data = self.data()?;
        let y2 = data.y2.clone();
        self.work.explained_denominator = if self.info.layout.has_intercept() {
            mod_sub(&count_y2, &ysum_sq, &p)
        } else {
            y2.clone()
        };
        // SSE at scale 2^4b, short of βᵀAβ
        self.work.sse = mod_sub(&self.scaled(&y2, 2 * b), &self.scaled(&beta_v, b + 1), &p);

        let mut x = self.work.beta.clone();
        x.extend(self.work.beta_sq.iter().cloned());
        let mut y = a_beta;
        y.extend(std::iter::repeat(self.work.det.clone()).take(d));
        let multiply = self.multiply(x, y)?;
        self.state = State::AwaitingSecondProducts;
        Ok(Actions::invoked(multiply, ctx.peers.data_owners_only()))
    }

    /// Scale the SSE by the count when centring.
    fn on_second_products(
        &mut self,
        ctx: &Context<'_>,
        mut products: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        let p = self.p().clone();
        self.work.beta_sq_det = products.split_off(d);
        let quadratic = self.sum(&products);
        self.work.sse = mod_add(&self.work.sse, &quadratic, &p);

        let factor = if self.info.layout.has_intercept() {
            self.data()?.count.clone()
        } else {
            public(ctx, BigUint::one())
        };
        let multiply = self.multiply(vec![factor], vec![self.work.sse.clone()])?;
        self.state = State::AwaitingScaledResidual;
        Ok(Actions::invoked(multiply, ctx.peers.data_owners_only()))
    }

    /// `N_R · (n - d)` next to `MSE = SSE · 2^b / (n - d)`.
    fn on_scaled_residual(
        &mut self,
        ctx: &Context<'_>,
        products: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let p = self.p().clone();
        let b = self.info.bits;
        self.work.scaled_sse = first(products)?;
        self.work.explained = mod_sub(
            &self.scaled(&self.work.explained_denominator, 2 * b),
            &self.work.scaled_sse,
            &p,
        );
        let d = BigUint::from(self.info.dim());
        self.work.dof = mod_sub(&self.data()?.count, &public(ctx, d), &p);

        let explained_dof = self.multiply(
            vec![self.work.explained.clone()],
            vec![self.work.dof.clone()],
        )?;
        let mse = self.signed_divide(
            vec![self.scaled(&self.work.sse, b)],
            vec![self.work.dof.clone()],
            self.info.quotient_bits.mse,
        )?;
        self.state = State::AwaitingErrorVariance;
        Ok(Actions::invoked(
            Batch::new(vec![Box::new(explained_dof), Box::new(mse)]),
            ctx.peers.data_owners_only(),
        ))
    }

    fn on_error_variance(
        &mut self,
        ctx: &Context<'_>,
        outputs: Vec<Output>,
    ) -> Result<Actions, ProtocolError> {
        let mut outputs = Batch::outputs_as::<Vec<BigUint>>(outputs)?.into_iter();
        self.work.explained_dof = first(outputs.next().unwrap_or_default())?;
        self.work.mse = first(outputs.next().unwrap_or_default())?;
        let d = self.info.dim();
        let multiply = self.multiply(vec![self.work.mse.clone(); d], self.work.adj_diag.clone())?;
        self.state = State::AwaitingScaledVariances;
        Ok(Actions::invoked(multiply, ctx.peers.data_owners_only()))
    }

    /// R², squared standard errors and the t and F table columns.
    fn on_scaled_variances(
        &mut self,
        ctx: &Context<'_>,
        mse_adj: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        let b = self.info.bits;
        let q = self.info.quotient_bits;
        let p = self.p().clone();
        self.work.mse_adj = mse_adj;

        let r_squared = self.signed_divide(
            vec![self.scaled(&self.work.explained, b)],
            vec![self.scaled(&self.work.explained_denominator, 2 * b)],
            q.r_squared,
        )?;
        let variances = self.signed_divide(
            self.work.mse_adj.iter().map(|x| self.scaled(x, b)).collect(),
            vec![self.work.det.clone(); d],
            q.variance,
        )?;

        let t_step = BigUint::from(self.info.t_table.step_size());
        let t_bits = b + self.info.t_table.bits_of_precision();
        let t_index = self.divide(
            self.work.beta_sq_det.iter().map(|x| self.scaled(x, t_bits)).collect(),
            self.work.mse_adj.iter().map(|x| mod_mul(x, &t_step, &p)).collect(),
            q.t_index,
        )?;

        let f_step =
            BigUint::from(self.info.layout.num_indep_vars() as u64 * self.info.f_table.step_size());
        let f_index = self.divide(
            vec![self.scaled(&self.work.explained_dof, self.info.f_table.bits_of_precision())],
            vec![mod_mul(&self.work.scaled_sse, &f_step, &p)],
            q.f_index,
        )?;

        self.state = State::AwaitingDivisions;
        Ok(Actions::invoked(
            Batch::new(vec![
                Box::new(r_squared),
                Box::new(variances),
                Box::new(t_index),
                Box::new(f_index),
            ]),
            ctx.peers.data_owners_only(),
        ))
    }

    /// Compare every index with its table width and the degrees of freedom with
    /// every row threshold.
    fn on_divisions(
        &mut self,
        ctx: &Context<'_>,
        outputs: Vec<Output>,
    ) -> Result<Actions, ProtocolError> {
        let mut outputs = Batch::outputs_as::<Vec<BigUint>>(outputs)?.into_iter();
        let mut next = || {
            outputs
                .next()
                .ok_or_else(|| ProtocolError::Invalid("division batch is short".to_string()))
        };
        self.work.r_squared = first(next()?)?;
        self.work.variances = next()?;
        let mut indices = next()?;
        indices.extend(next()?);
        self.work.indices = indices;

        let d = self.info.dim();
        let t = &self.info.t_table;
        let f = &self.info.f_table;
        let mut x = self.work.indices.clone();
        let mut y: Vec<BigUint> = (0..d)
            .map(|_| public(ctx, BigUint::from(t.num_cols())))
            .collect();
        y.push(public(ctx, BigUint::from(f.num_cols())));
        for &id in t.row_ids()[1..].iter().chain(&f.row_ids()[1..]) {
            x.push(self.work.dof.clone());
            y.push(public(ctx, BigUint::from(id)));
        }
        let compare = std::mem::take(&mut self.randomness()?.compare);
        self.state = State::AwaitingCompare;
        Ok(Actions::invoked(
            Compare::new(&self.info.divide.compare, x, y, compare),
            ctx.peers.data_owners_only(),
        ))
    }

    fn on_compared(
        &mut self,
        ctx: &Context<'_>,
        bits: Vec<bool>,
    ) -> Result<Actions, ProtocolError> {
        let dabits = std::mem::take(&mut self.randomness()?.typecast);
        self.state = State::AwaitingTypeCast;
        Ok(Actions::invoked(
            TypeCastFromBit::new(self.p(), bits, dabits),
            ctx.peers.data_owners_only(),
        ))
    }

    /// Clamp every index to the last column: `q + [q ≥ cols]·(cols - 1 - q)`.
    fn on_type_cast(
        &mut self,
        ctx: &Context<'_>,
        less_than: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        let p = self.p().clone();
        let one = public(ctx, BigUint::one());
        let mut over = Vec::with_capacity(d + 1);
        let mut span = Vec::with_capacity(d + 1);
        for (i, q) in self.work.indices.iter().enumerate() {
            let cols = if i < d {
                self.info.t_table.num_cols()
            } else {
                self.info.f_table.num_cols()
            };
            over.push(mod_sub(&one, &less_than[i], &p));
            span.push(mod_sub(&public(ctx, BigUint::from(cols - 1)), q, &p));
        }
        self.work.less_than = less_than;
        let multiply = self.multiply(over, span)?;
        self.state = State::AwaitingClamp;
        Ok(Actions::invoked(multiply, ctx.peers.data_owners_only()))
    }

    /// Table positions `row · cols + col`, row being the count of thresholds at or
    /// below the degrees of freedom.
    fn on_clamped(
        &mut self,
        ctx: &Context<'_>,
        corrections: Vec<BigUint>,
    ) -> Result<Actions, ProtocolError> {
        let d = self.info.dim();
        let p = self.p().clone();
        let columns: Vec<BigUint> = self
            .work
            .indices
            .iter()
            .zip(&corrections)
            .map(|(q, c)| mod_add(q, c, &p))
            .collect();

        let t_rows = self.info.t_table.num_rows();
        let f_rows = self.info.f_table.num_rows();
        let thresholds = &self.work.less_than[d + 1..];
        let row = |rows: usize, below: &[BigUint]| {
            mod_sub(&public(ctx, BigUint::from(rows - 1)), &self.sum(below), &p)
        };
        let t_row = row(t_rows, &thresholds[..t_rows - 1]);
        let f_row = row(f_rows, &thresholds[t_rows - 1..]);

        let t_cols = BigUint::from(self.info.t_table.num_cols());
        let f_cols = BigUint::from(self.info.f_table.num_cols());
        let t_locations = columns[..d]
            .iter()
            .map(|col| mod_add(&mod_mul(&t_row, &t_cols, &p), col, &p))
            .collect();
        let f_location = mod_add(&mod_mul(&f_row, &f_cols, &p), &columns[d], &p);

        let randomness = self.randomness()?;
        let f_randomness = std::mem::take(&mut randomness.f_lookup);
        let t_randomness = std::mem::take(&mut randomness.t_lookup);
        let f_lookup = Lookup::new(
            &self.info.f_lookup,
            self.info.f_table.cells(),
            vec![f_location],
            f_randomness,
        );
        let t_lookup = Lookup::new(
            &self.info.t_lookup,
            self.info.t_table.cells(),
            t_locations,
            t_randomness,
        );
        self.state = State::AwaitingLookup;
        Ok(Actions::invoked(
            Batch::new(vec![Box::new(f_lookup), Box::new(t_lookup)]),
            ctx.peers.data_owners_only(),
        ))
    }

    fn on_lookup(
        &mut self,
        ctx: &Context<'_>,
        outputs: Vec<Output>,
    ) -> Result<Actions, ProtocolError> {
        let cells: Vec<Vec<u8>> = Batch::outputs_as::<Vec<Vec<u8>>>(outputs)?
            .into_iter()
            .flatten()
            .collect();
        let work = &mut self.work;
        let mut values = std::mem::take(&mut work.beta);
        values.push(work.mse.clone());
        values.push(work.r_squared.clone());
        values.append(&mut work.variances);

        let mut w = MessageWriter::new();
        w.write_elems(&values, &self.info.end_modulus);
        for cell in &cells {
            w.write_bytes(cell);
        }
        let recipients = ctx.peers.recipients();
        if recipients.is_empty() {
            warn!("regression query has no recipient");
        }
        debug!(values = values.len(), cells = cells.len(), "sending regression shares");
        let mut actions = Actions::none();
        actions
            .broadcast(recipients.iter().copied(), w.into_bytes())
            .complete(());
        Ok(actions)
    }
}

/// Share of a public constant: the revealer holds it, everyone else zero.
fn public(ctx: &Context<'_>, x: BigUint) -> BigUint {
    if ctx.is_revealer() {
        x
    } else {
        BigUint::zero()
    }
}

fn first(xs: Vec<BigUint>) -> Result<BigUint, ProtocolError> {
    xs.into_iter()
        .next()
        .ok_or_else(|| ProtocolError::Invalid("empty result".to_string()))
}

impl Fronctocol for Regression {
    fn name(&self) -> &'static str {
        "Regression"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        use State::*;
        match (self.state, event) {
            (Init, Event::Init) => {
                info!(
                    start_modulus = %self.info.start_modulus,
                    end_modulus = %self.info.end_modulus,
                    key_modulus = %self.info.join.key_modulus(),
                    regressors = self.info.dim(),
                    "regression query"
                );
                let peers: PeerSet = computing_peers(ctx.peers);
                let join = PairwiseJoin::new(
                    self.info.join.clone(),
                    self.info.factory(),
                    std::mem::take(&mut self.rows),
                );
                let mut actions = Actions::none();
                actions
                    .invoke_tagged(
                        Box::new(self.info.randomness_order().patrons()),
                        peers.clone(),
                        RANDOMNESS_TAG,
                    )
                    .invoke_tagged(Box::new(join), peers, JOIN_TAG);
                self.state = AwaitingRandomnessAndJoin;
                Ok(actions)
            }
            (AwaitingRandomnessAndJoin, Event::Complete(completion)) => {
                match completion.tag {
                    RANDOMNESS_TAG => {
                        self.delivery = Some(Delivery::new(completion.output::<Vec<Output>>()?))
                    }
                    _ => self.sums = Some(completion.output::<Vec<BigUint>>()?),
                }
                match (self.delivery.is_some(), self.sums.take()) {
                    (true, Some(sums)) => {
                        debug!("join complete");
                        self.on_join(ctx, sums)
                    }
                    (_, sums) => {
                        self.sums = sums;
                        Ok(Actions::none())
                    }
                }
            }
            (state, Event::Complete(completion)) => {
                let output = completion.into_output();
                match state {
                    AwaitingModConvUp => self.on_converted(ctx, downcast(output)?),
                    AwaitingBlindedProduct => self.on_blinded(ctx, downcast(output)?),
                    AwaitingReveal => self.on_revealed(ctx, downcast(output)?),
                    AwaitingUnblind => self.on_unblinded(ctx, downcast(output)?),
                    AwaitingCoefficients => self.on_coefficients(ctx, downcast(output)?),
                    AwaitingFirstProducts => self.on_first_products(ctx, downcast(output)?),
                    AwaitingSecondProducts => self.on_second_products(ctx, downcast(output)?),
                    AwaitingScaledResidual => self.on_scaled_residual(ctx, downcast(output)?),
                    AwaitingErrorVariance => self.on_error_variance(ctx, downcast(output)?),
                    AwaitingScaledVariances => self.on_scaled_variances(ctx, downcast(output)?),
                    AwaitingDivisions => self.on_divisions(ctx, downcast(output)?),
                    AwaitingCompare => self.on_compared(ctx, downcast(output)?),
                    AwaitingTypeCast => self.on_type_cast(ctx, downcast(output)?),
                    AwaitingClamp => self.on_clamped(ctx, downcast(output)?),
                    AwaitingLookup => self.on_lookup(ctx, downcast(output)?),
                    Init | AwaitingRandomnessAndJoin => Err(ProtocolError::Invalid(format!(
                        "{} completed a child in state {:?}",
                        self.name(),
                        state
                    ))),
                }
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}
