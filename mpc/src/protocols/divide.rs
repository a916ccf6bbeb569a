//! Integer division of shared values.
//!
//! [`Divide`] runs restoring division one quotient bit at a time: compare the
//! remainder with `2^i·D`, convert the outcome to an additive bit, subtract. The
//! quotient is bounded by `2^k - 1`; larger quotients saturate.

use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;

use crate::{
    arith::{mod_add, mod_mul, mod_sub, pow2},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    randomness::RandomnessInfo,
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    compare::{Compare, CompareInfo, CompareRandomness},
    multiply::{BeaverTriple, Multiply},
    typecast::{DaBit, TypeCastFromBit},
};

#[derive(Clone, Debug)]
pub struct DivideInfo {
    pub compare: CompareInfo,
}

impl DivideInfo {
    pub fn new(compare: CompareInfo) -> Self {
        Self { compare }
    }

    pub fn modulus(&self) -> &BigUint {
        &self.compare.modulus
    }
}

/// One party's randomness for one quotient bit of one division.
#[derive(Clone, Debug)]
pub struct DivideStepRandomness {
    pub compare: CompareRandomness,
    pub dabit: DaBit,
    pub triple: BeaverTriple,
}

impl RandomnessInfo for DivideInfo {
    type Instance = DivideStepRandomness;

    fn name(&self) -> &'static str {
        "DivideStep"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<DivideStepRandomness> {
        let p = self.modulus();
        let compare = self.compare.generate(parties, rng);
        let dabits = DaBit::generate(p, parties, rng);
        let triples = BeaverTriple::generate(p, parties, rng);
        itertools::izip!(compare, dabits, triples)
            .map(|(compare, dabit, triple)| DivideStepRandomness {
                compare,
                dabit,
                triple,
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &DivideStepRandomness) {
        self.compare.write_instance(w, &instance.compare);
        instance.dabit.write(w, self.modulus());
        instance.triple.write(w, self.modulus());
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<DivideStepRandomness, WireError> {
        Ok(DivideStepRandomness {
            compare: self.compare.read_instance(r)?,
            dabit: DaBit::read(r, self.modulus())?,
            triple: BeaverTriple::read(r, self.modulus())?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingCompare,
    AwaitingTypeCast,
    AwaitingMultiply,
}

/// Shares of `min(floor(N / D), 2^k - 1)` for non-negative `N` and positive `D`.
///
/// Requires `N + 2^k·D < p/2`. Randomness is laid out step-major: entry
/// `step·n + j` serves element `j` at step `step`. Completes with `Vec<BigUint>`.
pub struct Divide {
    info: DivideInfo,
    quotient_bits: usize,
    denominators: Vec<BigUint>,
    remainders: Vec<BigUint>,
    quotients: Vec<BigUint>,
    randomness: Vec<DivideStepRandomness>,
    /// current step, counting down
    bit: usize,
    bits_this_step: Vec<BigUint>,
    state: State,
}

impl Divide {
    pub fn new(
        info: &DivideInfo,
        quotient_bits: usize,
        numerators: Vec<BigUint>,
        denominators: Vec<BigUint>,
        randomness: Vec<DivideStepRandomness>,
    ) -> Self {
        assert_eq!(numerators.len(), denominators.len(), "operand lengths differ");
        assert_eq!(
            randomness.len(),
            numerators.len() * quotient_bits,
            "one randomness bundle per element and quotient bit"
        );
        let n = numerators.len();
        Self {
            info: info.clone(),
            quotient_bits,
            denominators,
            remainders: numerators,
            quotients: vec![BigUint::zero(); n],
            randomness,
            bit: quotient_bits,
            bits_this_step: Vec::new(),
            state: State::Init,
        }
    }

    fn len(&self) -> usize {
        self.denominators.len()
    }

    fn start_step(&mut self, ctx: &Context<'_>) -> Actions {
        let p = self.info.modulus().clone();
        self.bit -= 1;
        let scale = pow2(self.bit) % &p;
        let shifted = self
            .denominators
            .iter()
            .map(|d| mod_mul(d, &scale, &p))
            .collect();
        // randomness of the highest bit comes first
        let step = self.quotient_bits - 1 - self.bit;
        let n = self.len();
        let compare = self.randomness[step * n..(step + 1) * n]
            .iter()
            .map(|r| r.compare.clone())
            .collect();
        self.state = State::AwaitingCompare;
        Actions::invoked(
            Compare::new(&self.info.compare, self.remainders.clone(), shifted, compare),
            ctx.peers.clone(),
        )
    }

    fn step_randomness(&self) -> &[DivideStepRandomness] {
        let step = self.quotient_bits - 1 - self.bit;
        let n = self.len();
        &self.randomness[step * n..(step + 1) * n]
    }
}

impl Fronctocol for Divide {
    fn name(&self) -> &'static str {
        "Divide"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let p = self.info.modulus().clone();
        match (self.state, event) {
            (State::Init, Event::Init) if self.len() == 0 || self.quotient_bits == 0 => {
                Ok(Actions::completed(std::mem::take(&mut self.quotients)))
            }
            (State::Init, Event::Init) => Ok(self.start_step(ctx)),
            (State::AwaitingCompare, Event::Complete(completion)) => {
                let less_than = completion.output::<Vec<bool>>()?;
                let revealer = ctx.is_revealer();
                // r >= 2^i·D is the negation
                let at_least = less_than.into_iter().map(|b| b ^ revealer).collect();
                let dabits = self.step_randomness().iter().map(|r| r.dabit.clone()).collect();
                self.state = State::AwaitingTypeCast;
                Ok(Actions::invoked(
                    TypeCastFromBit::new(&p, at_least, dabits),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingTypeCast, Event::Complete(completion)) => {
                self.bits_this_step = completion.output::<Vec<BigUint>>()?;
                let triples = self.step_randomness().iter().map(|r| r.triple.clone()).collect();
                self.state = State::AwaitingMultiply;
                Ok(Actions::invoked(
                    Multiply::new(
                        &p,
                        self.bits_this_step.clone(),
                        self.denominators.clone(),
                        triples,
                    ),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingMultiply, Event::Complete(completion)) => {
                let products = completion.output::<Vec<BigUint>>()?;
                let scale = pow2(self.bit) % &p;
                for ((r, q), (b, bd)) in self
                    .remainders
                    .iter_mut()
                    .zip(self.quotients.iter_mut())
                    .zip(self.bits_this_step.iter().zip(&products))
                {
                    *r = mod_sub(r, &mod_mul(bd, &scale, &p), &p);
                    *q = mod_add(q, &mod_mul(b, &scale, &p), &p);
                }
                if self.bit == 0 {
                    Ok(Actions::completed(std::mem::take(&mut self.quotients)))
                } else {
                    Ok(self.start_step(ctx))
                }
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

/// Randomness for the sign handling around one signed division.
#[derive(Clone, Debug)]
pub struct SignedDivideRandomness {
    pub compare: CompareRandomness,
    pub dabit: DaBit,
    pub abs_triple: BeaverTriple,
    pub sign_triple: BeaverTriple,
}

#[derive(Clone, Debug)]
pub struct SignedDivideInfo {
    pub divide: DivideInfo,
}

impl RandomnessInfo for SignedDivideInfo {
    type Instance = SignedDivideRandomness;

    fn name(&self) -> &'static str {
        "SignedDivide"
    }

    fn generate<R: Rng + ?Sized>(
        &self,
        parties: usize,
        rng: &mut R,
    ) -> Vec<SignedDivideRandomness> {
        let p = self.divide.modulus();
        let compare = self.divide.compare.generate(parties, rng);
        let dabits = DaBit::generate(p, parties, rng);
        let abs = BeaverTriple::generate(p, parties, rng);
        let sign = BeaverTriple::generate(p, parties, rng);
        itertools::izip!(compare, dabits, abs, sign)
            .map(|(compare, dabit, abs_triple, sign_triple)| SignedDivideRandomness {
                compare,
                dabit,
                abs_triple,
                sign_triple,
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &SignedDivideRandomness) {
        let p = self.divide.modulus();
        self.divide.compare.write_instance(w, &instance.compare);
        instance.dabit.write(w, p);
        instance.abs_triple.write(w, p);
        instance.sign_triple.write(w, p);
    }

    fn read_instance(
        &self,
        r: &mut MessageReader<'_>,
    ) -> Result<SignedDivideRandomness, WireError> {
        let p = self.divide.modulus();
        Ok(SignedDivideRandomness {
            compare: self.divide.compare.read_instance(r)?,
            dabit: DaBit::read(r, p)?,
            abs_triple: BeaverTriple::read(r, p)?,
            sign_triple: BeaverTriple::read(r, p)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SignedState {
    Init,
    AwaitingSign,
    AwaitingTypeCast,
    AwaitingAbs,
    AwaitingDivide,
    AwaitingRestoreSign,
}

/// Division of a signed numerator by a positive denominator, truncating toward zero.
/// Completes with `Vec<BigUint>`.
pub struct SignedDivide {
    info: DivideInfo,
    quotient_bits: usize,
    numerators: Vec<BigUint>,
    denominators: Vec<BigUint>,
    signs: Vec<SignedDivideRandomness>,
    steps: Vec<DivideStepRandomness>,
    sigma: Vec<BigUint>,
    state: SignedState,
}

impl SignedDivide {
    pub fn new(
        info: &DivideInfo,
        quotient_bits: usize,
        numerators: Vec<BigUint>,
        denominators: Vec<BigUint>,
        signs: Vec<SignedDivideRandomness>,
        steps: Vec<DivideStepRandomness>,
    ) -> Self {
        assert_eq!(numerators.len(), signs.len(), "one sign bundle per element");
        Self {
            info: info.clone(),
            quotient_bits,
            numerators,
            denominators,
            signs,
            steps,
            sigma: Vec::new(),
            state: SignedState::Init,
        }
    }
}

impl Fronctocol for SignedDivide {
    fn name(&self) -> &'static str {
        "SignedDivide"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let p = self.info.modulus().clone();
        match (self.state, event) {
            (SignedState::Init, Event::Init) if self.numerators.is_empty() => {
                Ok(Actions::completed(Vec::<BigUint>::new()))
            }
            (SignedState::Init, Event::Init) => {
                let compare = self.signs.iter().map(|s| s.compare.clone()).collect();
                self.state = SignedState::AwaitingSign;
                Ok(Actions::invoked(
                    Compare::is_negative(&self.info.compare, self.numerators.clone(), compare),
                    ctx.peers.clone(),
                ))
            }
            (SignedState::AwaitingSign, Event::Complete(completion)) => {
                let negative = completion.output::<Vec<bool>>()?;
                let dabits = self.signs.iter().map(|s| s.dabit.clone()).collect();
                self.state = SignedState::AwaitingTypeCast;
                Ok(Actions::invoked(
                    TypeCastFromBit::new(&p, negative, dabits),
                    ctx.peers.clone(),
                ))
            }
            (SignedState::AwaitingTypeCast, Event::Complete(completion)) => {
                let negative = completion.output::<Vec<BigUint>>()?;
                self.sigma = sign_factors(&negative, ctx.is_revealer(), &p);
                let triples = self.signs.iter().map(|s| s.abs_triple.clone()).collect();
                self.state = SignedState::AwaitingAbs;
                Ok(Actions::invoked(
                    Multiply::new(
                        &p,
                        self.sigma.clone(),
                        std::mem::take(&mut self.numerators),
                        triples,
                    ),
                    ctx.peers.clone(),
                ))
            }
            (SignedState::AwaitingAbs, Event::Complete(completion)) => {
                let magnitudes = completion.output::<Vec<BigUint>>()?;
                self.state = SignedState::AwaitingDivide;
                Ok(Actions::invoked(
                    Divide::new(
                        &self.info,
                        self.quotient_bits,
                        magnitudes,
                        std::mem::take(&mut self.denominators),
                        std::mem::take(&mut self.steps),
                    ),
                    ctx.peers.clone(),
                ))
            }
            (SignedState::AwaitingDivide, Event::Complete(completion)) => {
                let quotients = completion.output::<Vec<BigUint>>()?;
                let triples = self.signs.iter().map(|s| s.sign_triple.clone()).collect();
                self.state = SignedState::AwaitingRestoreSign;
                Ok(Actions::invoked(
                    Multiply::new(&p, std::mem::take(&mut self.sigma), quotients, triples),
                    ctx.peers.clone(),
                ))
            }
            (SignedState::AwaitingRestoreSign, Event::Complete(completion)) => {
                Ok(Actions::completed(completion.output::<Vec<BigUint>>()?))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

/// Shares of `1 - 2s` from shares of bits `s`.
pub fn sign_factors(bits: &[BigUint], revealer: bool, p: &BigUint) -> Vec<BigUint> {
    let two = BigUint::from(2u32);
    bits.iter()
        .map(|s| {
            let minus_two_s = mod_sub(&BigUint::zero(), &mod_mul(s, &two, p), p);
            if revealer {
                mod_add(&minus_two_s, &BigUint::from(1u32), p)
            } else {
                minus_two_s
            }
        })
        .collect()
}
