//! Comparison of a public integer against a bitwise-shared one.
//!
//! Bits are split into `blocks` blocks of `block` bits, most significant first.
//! The first block where the two integers differ is found with two rounds of
//! prefix-or over blocks; the same is then done inside the selected block.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;

use crate::{
    arith::{bit, mod_add, mod_sub},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    lagrange::prefix_or_coefficients,
    randomness::{transpose, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    multiply::{BeaverTriple, Multiply},
    prefix_or::{PolynomialEval, PrefixOrMask},
};

/// Shape and polynomials of a bitwise comparison modulo `modulus`.
#[derive(Clone, Debug)]
pub struct BitwiseInfo {
    pub modulus: BigUint,
    pub bits: usize,
    pub block: usize,
    pub blocks: usize,
    pub poly_block: Arc<Vec<BigUint>>,
    pub poly_prefix: Arc<Vec<BigUint>>,
}

impl BitwiseInfo {
    pub fn new(modulus: &BigUint, bits: usize) -> Result<Self, ProtocolError> {
        let bits = bits.max(1);
        let mut block = 1;
        while block * block < bits {
            block += 1;
        }
        let blocks = (bits + block - 1) / block;
        let poly = |ell| {
            prefix_or_coefficients(modulus, ell).ok_or_else(|| {
                ProtocolError::Invalid(format!("modulus {} too small for {} bits", modulus, bits))
            })
        };
        Ok(Self {
            modulus: modulus.clone(),
            bits,
            block,
            blocks,
            poly_block: Arc::new(poly(block)?),
            poly_prefix: Arc::new(poly(blocks)?),
        })
    }

    fn padded_bits(&self) -> usize {
        self.block * self.blocks
    }
}

/// One party's randomness for one bitwise comparison.
#[derive(Clone, Debug, Default)]
pub struct BitwiseRandomness {
    block_masks: Vec<PrefixOrMask>,
    prefix_masks: Vec<PrefixOrMask>,
    inner_masks: Vec<PrefixOrMask>,
    select_triples: Vec<BeaverTriple>,
    final_triples: Vec<BeaverTriple>,
}

impl RandomnessInfo for BitwiseInfo {
    type Instance = BitwiseRandomness;

    fn name(&self) -> &'static str {
        "BitwiseLessThan"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<BitwiseRandomness> {
        let q = &self.modulus;
        let masks = |count: usize, degree: usize, rng: &mut R| {
            transpose(
                (0..count)
                    .map(|_| PrefixOrMask::generate(q, degree, parties, rng))
                    .collect(),
                parties,
            )
        };
        let block_masks = masks(self.blocks, self.block, rng);
        let prefix_masks = masks(self.blocks, self.blocks, rng);
        let inner_masks = masks(self.block, self.block, rng);
        let triples = |count: usize, rng: &mut R| {
            transpose(
                (0..count)
                    .map(|_| BeaverTriple::generate(q, parties, rng))
                    .collect(),
                parties,
            )
        };
        let select_triples = triples(self.padded_bits(), rng);
        let final_triples = triples(self.block, rng);

        itertools::izip!(block_masks, prefix_masks, inner_masks, select_triples, final_triples)
            .map(
                |(block_masks, prefix_masks, inner_masks, select_triples, final_triples)| {
                    BitwiseRandomness {
                        block_masks,
                        prefix_masks,
                        inner_masks,
                        select_triples,
                        final_triples,
                    }
                },
            )
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &BitwiseRandomness) {
        let q = &self.modulus;
        for mask in instance
            .block_masks
            .iter()
            .chain(&instance.prefix_masks)
            .chain(&instance.inner_masks)
        {
            mask.write(w, q);
        }
        for triple in instance
            .select_triples
            .iter()
            .chain(&instance.final_triples)
        {
            triple.write(w, q);
        }
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<BitwiseRandomness, WireError> {
        let q = &self.modulus;
        let mut masks = |count: usize, degree: usize| {
            (0..count)
                .map(|_| PrefixOrMask::read(r, q, degree))
                .collect::<Result<Vec<_>, _>>()
        };
        let block_masks = masks(self.blocks, self.block)?;
        let prefix_masks = masks(self.blocks, self.blocks)?;
        let inner_masks = masks(self.block, self.block)?;
        let mut triples = |count: usize| {
            (0..count)
                .map(|_| BeaverTriple::read(r, q))
                .collect::<Result<Vec<_>, _>>()
        };
        let select_triples = triples(self.padded_bits())?;
        let final_triples = triples(self.block)?;
        Ok(BitwiseRandomness {
            block_masks,
            prefix_masks,
            inner_masks,
            select_triples,
            final_triples,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingBlockOr,
    AwaitingPrefixOr,
    AwaitingSelection,
    AwaitingInnerOr,
    AwaitingFinalMultiply,
}

/// Shares modulo `info.modulus` of `[c < r]` for public `c` and bitwise-shared `r`.
///
/// `r_bits` hold `info.bits` shares each, most significant first. Completes with
/// `Vec<BigUint>`.
pub struct BitwiseLessThan {
    info: Arc<BitwiseInfo>,
    c: Vec<BigUint>,
    r_bits: Vec<Vec<BigUint>>,
    randomness: Vec<BitwiseRandomness>,
    state: State,
    /// `c ⊕ r`, padded, per comparison
    diffs: Vec<Vec<BigUint>>,
    /// one-hot first differing block
    selectors: Vec<Vec<BigUint>>,
    /// public bits of `c` inside the selected block
    selected_c: Vec<Vec<BigUint>>,
    /// `e_t`, prefix-or inside the selected block
    inner: Vec<Vec<BigUint>>,
}

impl BitwiseLessThan {
    pub fn new(
        info: Arc<BitwiseInfo>,
        c: Vec<BigUint>,
        r_bits: Vec<Vec<BigUint>>,
        randomness: Vec<BitwiseRandomness>,
    ) -> Self {
        assert_eq!(c.len(), r_bits.len(), "one bit decomposition per comparison");
        assert_eq!(c.len(), randomness.len(), "one randomness bundle per comparison");
        Self {
            info,
            c,
            r_bits,
            randomness,
            state: State::Init,
            diffs: Vec::new(),
            selectors: Vec::new(),
            selected_c: Vec::new(),
            inner: Vec::new(),
        }
    }

    /// Public bit `t` (most significant first, zero in the padding) of `c`.
    fn c_bit(&self, c: &BigUint, t: usize) -> bool {
        t < self.info.bits && bit(c, self.info.bits - 1 - t)
    }

    fn one(&self, revealer: bool) -> BigUint {
        if revealer {
            BigUint::from(1u32)
        } else {
            BigUint::zero()
        }
    }

    fn compute_diffs(&mut self, revealer: bool) {
        let q = self.info.modulus.clone();
        let one = self.one(revealer);
        let padded = self.info.padded_bits();
        self.diffs = self
            .c
            .iter()
            .zip(&self.r_bits)
            .map(|(c, r)| {
                (0..padded)
                    .map(|t| match r.get(t) {
                        Some(r_t) if self.c_bit(c, t) => mod_sub(&one, r_t, &q),
                        Some(r_t) => r_t.clone(),
                        None => BigUint::zero(),
                    })
                    .collect()
            })
            .collect();
    }

    /// `1 + running sum`, one point per entry of `values`, optionally accumulated.
    fn points(&self, values: &[BigUint], cumulative: bool, revealer: bool) -> Vec<BigUint> {
        let q = &self.info.modulus;
        let one = self.one(revealer);
        let mut acc = BigUint::zero();
        values
            .iter()
            .map(|v| {
                if cumulative {
                    acc = mod_add(&acc, v, q);
                    mod_add(&acc, &one, q)
                } else {
                    mod_add(v, &one, q)
                }
            })
            .collect()
    }

    fn invoke_eval(
        &self,
        ctx: &Context<'_>,
        coeffs: &Arc<Vec<BigUint>>,
        points: Vec<BigUint>,
        masks: Vec<PrefixOrMask>,
    ) -> Actions {
        Actions::invoked(
            PolynomialEval::new(&self.info.modulus, coeffs.clone(), points, masks),
            ctx.peers.clone(),
        )
    }
}

impl Fronctocol for BitwiseLessThan {
    fn name(&self) -> &'static str {
        "BitwiseLessThan"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let revealer = ctx.is_revealer();
        let q = self.info.modulus.clone();
        let (block, blocks) = (self.info.block, self.info.blocks);
        match (self.state, event) {
            (State::Init, Event::Init) if self.c.is_empty() => {
                Ok(Actions::completed(Vec::<BigUint>::new()))
            }
            (State::Init, Event::Init) => {
                self.compute_diffs(revealer);
                let mut points = Vec::with_capacity(self.c.len() * blocks);
                for diffs in &self.diffs {
                    let sums: Vec<BigUint> = diffs
                        .chunks(block)
                        .map(|chunk| {
                            chunk.iter().fold(BigUint::zero(), |acc, d| mod_add(&acc, d, &q))
                        })
                        .collect();
                    points.extend(self.points(&sums, false, revealer));
                }
                let masks = self
                    .randomness
                    .iter_mut()
                    .flat_map(|r| std::mem::take(&mut r.block_masks))
                    .collect();
                self.state = State::AwaitingBlockOr;
                Ok(self.invoke_eval(ctx, &self.info.poly_block, points, masks))
            }
            (State::AwaitingBlockOr, Event::Complete(completion)) => {
                let block_or = completion.output::<Vec<BigUint>>()?;
                let points = block_or
                    .chunks(blocks)
                    .flat_map(|e| self.points(e, true, revealer))
                    .collect();
                let masks = self
                    .randomness
                    .iter_mut()
                    .flat_map(|r| std::mem::take(&mut r.prefix_masks))
                    .collect();
                self.state = State::AwaitingPrefixOr;
                Ok(self.invoke_eval(ctx, &self.info.poly_prefix, points, masks))
            }
            (State::AwaitingPrefixOr, Event::Complete(completion)) => {
                let prefix_or = completion.output::<Vec<BigUint>>()?;
                self.selectors = prefix_or
                    .chunks(blocks)
                    .map(|f| {
                        (0..blocks)
                            .map(|k| match k {
                                0 => f[0].clone(),
                                _ => mod_sub(&f[k], &f[k - 1], &q),
                            })
                            .collect()
                    })
                    .collect();

                // [G_k] · [d_{k,t}] for every block k and position t
                let mut x = Vec::new();
                let mut y = Vec::new();
                for (selector, diffs) in self.selectors.iter().zip(&self.diffs) {
                    for (k, g) in selector.iter().enumerate() {
                        x.extend(std::iter::repeat(g.clone()).take(block));
                        y.extend_from_slice(&diffs[k * block..(k + 1) * block]);
                    }
                }
                let triples = self
                    .randomness
                    .iter_mut()
                    .flat_map(|r| std::mem::take(&mut r.select_triples))
                    .collect();

                // selected public bits are linear in the selector
                self.selected_c = self
                    .c
                    .iter()
                    .zip(&self.selectors)
                    .map(|(c, selector)| {
                        (0..block)
                            .map(|t| {
                                selector
                                    .iter()
                                    .enumerate()
                                    .filter(|(k, _)| self.c_bit(c, k * block + t))
                                    .fold(BigUint::zero(), |acc, (_, g)| mod_add(&acc, g, &q))
                            })
                            .collect()
                    })
                    .collect();

                self.state = State::AwaitingSelection;
                Ok(Actions::invoked(
                    Multiply::new(&q, x, y, triples),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingSelection, Event::Complete(completion)) => {
                let products = completion.output::<Vec<BigUint>>()?;
                let mut points = Vec::with_capacity(self.c.len() * block);
                for per_comparison in products.chunks(blocks * block) {
                    let selected: Vec<BigUint> = (0..block)
                        .map(|t| {
                            (0..blocks).fold(BigUint::zero(), |acc, k| {
                                mod_add(&acc, &per_comparison[k * block + t], &q)
                            })
                        })
                        .collect();
                    points.extend(self.points(&selected, true, revealer));
                }
                let masks = self
                    .randomness
                    .iter_mut()
                    .flat_map(|r| std::mem::take(&mut r.inner_masks))
                    .collect();
                self.state = State::AwaitingInnerOr;
                Ok(self.invoke_eval(ctx, &self.info.poly_block, points, masks))
            }
            (State::AwaitingInnerOr, Event::Complete(completion)) => {
                let inner_or = completion.output::<Vec<BigUint>>()?;
                self.inner = inner_or.chunks(block).map(<[BigUint]>::to_vec).collect();

                // f_t = e_t - e_{t-1}, first differing position
                let mut x = Vec::with_capacity(self.c.len() * block);
                let mut y = Vec::with_capacity(self.c.len() * block);
                for (e, gamma) in self.inner.iter().zip(&self.selected_c) {
                    for t in 0..block {
                        x.push(match t {
                            0 => e[0].clone(),
                            _ => mod_sub(&e[t], &e[t - 1], &q),
                        });
                        y.push(gamma[t].clone());
                    }
                }
                let triples = self
                    .randomness
                    .iter_mut()
                    .flat_map(|r| std::mem::take(&mut r.final_triples))
                    .collect();
                self.state = State::AwaitingFinalMultiply;
                Ok(Actions::invoked(
                    Multiply::new(&q, x, y, triples),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingFinalMultiply, Event::Complete(completion)) => {
                let products = completion.output::<Vec<BigUint>>()?;
                let less_than = self
                    .inner
                    .iter()
                    .zip(products.chunks(block))
                    .map(|(e, f_gamma)| {
                        f_gamma
                            .iter()
                            .fold(e[block - 1].clone(), |acc, x| mod_sub(&acc, x, &q))
                    })
                    .collect::<Vec<_>>();
                Ok(Actions::completed(less_than))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

/// Most-significant-first bits of `x`, as `0`/`1` field elements.
pub fn bits_msb_first(x: &BigUint, bits: usize) -> Vec<BigUint> {
    (0..bits)
        .map(|t| BigUint::from(bit(x, bits - 1 - t) as u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::PeerSet,
        protocols::reveal::testing::*,
        randomness::{additive_share_vec, generate_many, testing::open_additive},
    };

    fn run(q: &BigUint, bits: usize, pairs: &[(u64, u64)], n: usize) -> Vec<BigUint> {
        let info = Arc::new(BitwiseInfo::new(q, bits).unwrap());
        let mut rng = rand::thread_rng();
        let c: Vec<BigUint> = pairs.iter().map(|(c, _)| BigUint::from(*c)).collect();
        let r_bits: Vec<Vec<Vec<BigUint>>> = pairs
            .iter()
            .map(|(_, r)| {
                additive_share_vec(&mut rng, &bits_msb_first(&BigUint::from(*r), bits), n, q)
            })
            .collect();
        let r_bits = transpose(r_bits, n);
        let randomness = generate_many(info.as_ref(), pairs.len(), n, &mut rng);

        let peers: PeerSet = data_owners(n).into_iter().collect();
        let parties = itertools::izip!(peers.data_owners(), r_bits, randomness)
            .map(|(id, r, rand)| {
                let f = BitwiseLessThan::new(info.clone(), c.clone(), r, rand);
                (*id, Box::new(f) as Box<dyn Fronctocol>)
            })
            .collect();
        let outputs = in_order(&peers, run_parties::<Vec<BigUint>>(parties, peers.clone()));
        open_additive(&outputs, q)
    }

    #[test]
    fn test_exhaustive_small() {
        let q = BigUint::from(257u32);
        let bits = 4;
        let pairs: Vec<(u64, u64)> = (0..16).flat_map(|c| (0..16).map(move |r| (c, r))).collect();
        let opened = run(&q, bits, &pairs, 2);
        for ((c, r), lt) in pairs.iter().zip(opened) {
            assert_eq!(lt, BigUint::from((c < r) as u32), "c={} r={}", c, r);
        }
    }

    #[test]
    fn test_wide_values_three_parties() {
        let q = crate::arith::prime_above_pow2(80);
        let bits = 70;
        let big = 1u64 << 62;
        let pairs = [
            (0, 0),
            (0, 1),
            (1, 0),
            (big, big + 1),
            (big + 1, big),
            (u64::MAX, big),
            (12345, 12345),
        ];
        let opened = run(&q, bits, &pairs, 3);
        for ((c, r), lt) in pairs.iter().zip(opened) {
            assert_eq!(lt, BigUint::from((c < r) as u32), "c={} r={}", c, r);
        }
    }
}
