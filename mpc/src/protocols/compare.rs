//! Secure comparison of additively shared values.
//!
//! For `|x - y| < p/2` the value `2(x - y) mod p` is odd exactly when `x < y`. Its
//! parity is read off a masked opening `c = 2(x - y) + r`: it equals
//! `c_0 ⊕ r_0 ⊕ [c < r]`, the last term accounting for the wrap around `p`.

use std::sync::Arc;

use num_bigint::BigUint;
use rand::Rng;

use crate::{
    arith::{bit, bit_length, mod_add, mod_mul, mod_sub, random_mod_p},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    randomness::{additive_share_vec, additive_shares, xor_shares, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    bitwise::{bits_msb_first, BitwiseInfo, BitwiseLessThan, BitwiseRandomness},
    multiply::{BeaverTriple, Multiply},
    reveal::Reveal,
    typecast::DaBit,
};

#[derive(Clone, Debug)]
pub struct CompareInfo {
    pub modulus: BigUint,
    pub bitwise: Arc<BitwiseInfo>,
}

impl CompareInfo {
    pub fn new(modulus: &BigUint) -> Result<Self, ProtocolError> {
        Ok(Self {
            modulus: modulus.clone(),
            bitwise: Arc::new(BitwiseInfo::new(modulus, bit_length(modulus))?),
        })
    }
}

/// One party's randomness for one comparison.
#[derive(Clone, Debug)]
pub struct CompareRandomness {
    pub r: BigUint,
    pub r_bits: Vec<BigUint>,
    pub r0: bool,
    pub bitwise: BitwiseRandomness,
    pub dabit: DaBit,
    pub triple: BeaverTriple,
}

impl RandomnessInfo for CompareInfo {
    type Instance = CompareRandomness;

    fn name(&self) -> &'static str {
        "Compare"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<CompareRandomness> {
        let p = &self.modulus;
        let r = random_mod_p(rng, p);
        let r_shares = additive_shares(rng, &r, parties, p);
        let r_bits = additive_share_vec(rng, &bits_msb_first(&r, self.bitwise.bits), parties, p);
        let r0 = xor_shares(rng, bit(&r, 0), parties);
        let bitwise = self.bitwise.generate(parties, rng);
        let dabits = DaBit::generate(p, parties, rng);
        let triples = BeaverTriple::generate(p, parties, rng);
        itertools::izip!(r_shares, r_bits, r0, bitwise, dabits, triples)
            .map(|(r, r_bits, r0, bitwise, dabit, triple)| CompareRandomness {
                r,
                r_bits,
                r0,
                bitwise,
                dabit,
                triple,
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &CompareRandomness) {
        let p = &self.modulus;
        w.write_elem(&instance.r, p);
        for b in &instance.r_bits {
            w.write_elem(b, p);
        }
        w.write_bool(instance.r0);
        self.bitwise.write_instance(w, &instance.bitwise);
        instance.dabit.write(w, p);
        instance.triple.write(w, p);
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<CompareRandomness, WireError> {
        let p = &self.modulus;
        let mask = r.read_elem(p)?;
        let r_bits = (0..self.bitwise.bits)
            .map(|_| r.read_elem(p))
            .collect::<Result<_, _>>()?;
        Ok(CompareRandomness {
            r: mask,
            r_bits,
            r0: r.read_bool()?,
            bitwise: self.bitwise.read_instance(r)?,
            dabit: DaBit::read(r, p)?,
            triple: BeaverTriple::read(r, p)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingMaskedOpen,
    AwaitingBitwise,
    AwaitingMultiply,
    AwaitingConversion,
}

/// XOR shares of `[x < y]` for additively shared `x`, `y` with `|x - y| < p/2`.
/// Completes with `Vec<bool>`.
pub struct Compare {
    info: CompareInfo,
    x: Vec<BigUint>,
    y: Vec<BigUint>,
    randomness: Vec<CompareRandomness>,
    state: State,
    opened_lsb: Vec<bool>,
    less_than: Vec<BigUint>,
}

impl Compare {
    pub fn new(
        info: &CompareInfo,
        x: Vec<BigUint>,
        y: Vec<BigUint>,
        randomness: Vec<CompareRandomness>,
    ) -> Self {
        assert_eq!(x.len(), y.len(), "operand lengths differ");
        assert_eq!(x.len(), randomness.len(), "one randomness bundle per comparison");
        Self {
            info: info.clone(),
            x,
            y,
            randomness,
            state: State::Init,
            opened_lsb: Vec::new(),
            less_than: Vec::new(),
        }
    }

    /// `[x < 0]`, i.e. the sign of `x` read as a signed residue.
    pub fn is_negative(
        info: &CompareInfo,
        x: Vec<BigUint>,
        randomness: Vec<CompareRandomness>,
    ) -> Self {
        let zeros = vec![BigUint::default(); x.len()];
        Self::new(info, x, zeros, randomness)
    }
}

impl Fronctocol for Compare {
    fn name(&self) -> &'static str {
        "Compare"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let p = self.info.modulus.clone();
        match (self.state, event) {
            (State::Init, Event::Init) if self.x.is_empty() => {
                Ok(Actions::completed(Vec::<bool>::new()))
            }
            (State::Init, Event::Init) => {
                let masked = itertools::izip!(&self.x, &self.y, &self.randomness)
                    .map(|(x, y, rand)| {
                        let diff = mod_sub(x, y, &p);
                        mod_add(&mod_add(&diff, &diff, &p), &rand.r, &p)
                    })
                    .collect();
                self.state = State::AwaitingMaskedOpen;
                Ok(Actions::invoked(Reveal::additive(&p, masked), ctx.peers.clone()))
            }
            (State::AwaitingMaskedOpen, Event::Complete(completion)) => {
                let opened = completion.output::<Vec<BigUint>>()?;
                self.opened_lsb = opened.iter().map(|c| bit(c, 0)).collect();
                let (r_bits, bitwise) = self
                    .randomness
                    .iter_mut()
                    .map(|rand| {
                        (
                            std::mem::take(&mut rand.r_bits),
                            std::mem::take(&mut rand.bitwise),
                        )
                    })
                    .unzip();
                self.state = State::AwaitingBitwise;
                Ok(Actions::invoked(
                    BitwiseLessThan::new(self.info.bitwise.clone(), opened, r_bits, bitwise),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingBitwise, Event::Complete(completion)) => {
                self.less_than = completion.output::<Vec<BigUint>>()?;
                let t = self.randomness.iter().map(|rand| rand.dabit.arith.clone()).collect();
                let triples = self.randomness.iter().map(|rand| rand.triple.clone()).collect();
                self.state = State::AwaitingMultiply;
                Ok(Actions::invoked(
                    Multiply::new(&p, self.less_than.clone(), t, triples),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingMultiply, Event::Complete(completion)) => {
                let products = completion.output::<Vec<BigUint>>()?;
                // w ⊕ t = w + t - 2wt
                let xored = itertools::izip!(&self.less_than, &self.randomness, &products)
                    .map(|(w, rand, wt)| {
                        let sum = mod_add(w, &rand.dabit.arith, &p);
                        mod_sub(&sum, &mod_mul(wt, &BigUint::from(2u32), &p), &p)
                    })
                    .collect();
                self.state = State::AwaitingConversion;
                Ok(Actions::invoked(Reveal::additive(&p, xored), ctx.peers.clone()))
            }
            (State::AwaitingConversion, Event::Complete(completion)) => {
                let opened = completion.output::<Vec<BigUint>>()?;
                let revealer = ctx.is_revealer();
                let bits = itertools::izip!(&opened, &self.opened_lsb, &self.randomness)
                    .map(|(u, &c0, rand)| {
                        let share = rand.r0 ^ rand.dabit.xor;
                        if revealer {
                            share ^ c0 ^ bit(u, 0)
                        } else {
                            share
                        }
                    })
                    .collect::<Vec<bool>>();
                Ok(Actions::completed(bits))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}
