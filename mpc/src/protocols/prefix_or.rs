//! Evaluation of a public polynomial at secret nonzero points.
//!
//! Each point `s` is multiplied by a random nonzero mask `m` and `s·m` is opened.
//! With shares of `m^-k` every power `s^k = (s·m)^k · m^-k` becomes linear.

use std::sync::Arc;

use num_bigint::BigUint;
use rand::Rng;

use crate::{
    arith::{mod_add, mod_invert, mod_mul, random_nonzero_mod_p},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    randomness::{additive_shares, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    multiply::{BeaverTriple, Multiply},
    reveal::Reveal,
};

/// One party's share of a polynomial evaluation mask.
#[derive(Clone, Debug)]
pub struct PrefixOrMask {
    pub mask: BigUint,
    /// Shares of `mask^-1, ..., mask^-degree`.
    pub inverse_powers: Vec<BigUint>,
    pub triple: BeaverTriple,
}

impl PrefixOrMask {
    pub(crate) fn generate<R: Rng + ?Sized>(
        modulus: &BigUint,
        degree: usize,
        parties: usize,
        rng: &mut R,
    ) -> Vec<Self> {
        let p = modulus;
        let m = random_nonzero_mod_p(rng, p);
        // m is nonzero and p prime
        let inverse = mod_invert(&m, p).unwrap_or_default();

        let mask_shares = additive_shares(rng, &m, parties, p);
        let mut inverse_shares: Vec<Vec<BigUint>> = vec![Vec::with_capacity(degree); parties];
        let mut power = inverse.clone();
        for _ in 0..degree {
            for (party, share) in additive_shares(rng, &power, parties, p).into_iter().enumerate() {
                inverse_shares[party].push(share);
            }
            power = mod_mul(&power, &inverse, p);
        }
        let triples = BeaverTriple::generate(p, parties, rng);

        itertools::izip!(mask_shares, inverse_shares, triples)
            .map(|(mask, inverse_powers, triple)| Self {
                mask,
                inverse_powers,
                triple,
            })
            .collect()
    }

    pub(crate) fn write(&self, w: &mut MessageWriter, modulus: &BigUint) {
        w.write_elem(&self.mask, modulus);
        for x in &self.inverse_powers {
            w.write_elem(x, modulus);
        }
        self.triple.write(w, modulus);
    }

    pub(crate) fn read(
        r: &mut MessageReader<'_>,
        modulus: &BigUint,
        degree: usize,
    ) -> Result<Self, WireError> {
        let mask = r.read_elem(modulus)?;
        let inverse_powers = (0..degree)
            .map(|_| r.read_elem(modulus))
            .collect::<Result<_, _>>()?;
        let triple = BeaverTriple::read(r, modulus)?;
        Ok(Self {
            mask,
            inverse_powers,
            triple,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PrefixOrInfo {
    pub modulus: BigUint,
    pub degree: usize,
}

impl RandomnessInfo for PrefixOrInfo {
    type Instance = PrefixOrMask;

    fn name(&self) -> &'static str {
        "PrefixOrMask"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<PrefixOrMask> {
        PrefixOrMask::generate(&self.modulus, self.degree, parties, rng)
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &PrefixOrMask) {
        instance.write(w, &self.modulus);
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<PrefixOrMask, WireError> {
        PrefixOrMask::read(r, &self.modulus, self.degree)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingMultiply,
    AwaitingReveal,
}

/// Shares of `P(s_i)` for shared nonzero points `s_i`. Completes with `Vec<BigUint>`.
pub struct PolynomialEval {
    modulus: BigUint,
    coeffs: Arc<Vec<BigUint>>,
    points: Vec<BigUint>,
    masks: Vec<PrefixOrMask>,
    state: State,
}

impl PolynomialEval {
    pub fn new(
        modulus: &BigUint,
        coeffs: Arc<Vec<BigUint>>,
        points: Vec<BigUint>,
        masks: Vec<PrefixOrMask>,
    ) -> Self {
        assert_eq!(points.len(), masks.len(), "one mask per point");
        assert!(
            masks
                .iter()
                .all(|m| m.inverse_powers.len() + 1 >= coeffs.len()),
            "mask degree below polynomial degree"
        );
        Self {
            modulus: modulus.clone(),
            coeffs,
            points,
            masks,
            state: State::Init,
        }
    }

    fn evaluate(&self, opened: &[BigUint], revealer: bool) -> Vec<BigUint> {
        let p = &self.modulus;
        opened
            .iter()
            .zip(&self.masks)
            .map(|(v, mask)| {
                let mut acc = if revealer {
                    self.coeffs[0].clone()
                } else {
                    BigUint::default()
                };
                let mut v_power = BigUint::from(1u32);
                for (coeff, inverse) in self.coeffs[1..].iter().zip(&mask.inverse_powers) {
                    v_power = mod_mul(&v_power, v, p);
                    let term = mod_mul(&mod_mul(coeff, &v_power, p), inverse, p);
                    acc = mod_add(&acc, &term, p);
                }
                acc
            })
            .collect()
    }
}

impl Fronctocol for PolynomialEval {
    fn name(&self) -> &'static str {
        "PolynomialEval"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match (self.state, event) {
            (State::Init, Event::Init) if self.points.is_empty() => {
                Ok(Actions::completed(Vec::<BigUint>::new()))
            }
            (State::Init, Event::Init) => {
                let masks: Vec<BigUint> = self.masks.iter().map(|m| m.mask.clone()).collect();
                let triples = self.masks.iter().map(|m| m.triple.clone()).collect();
                let points = std::mem::take(&mut self.points);
                self.state = State::AwaitingMultiply;
                Ok(Actions::invoked(
                    Multiply::new(&self.modulus, points, masks, triples),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingMultiply, Event::Complete(completion)) => {
                let masked = completion.output::<Vec<BigUint>>()?;
                self.state = State::AwaitingReveal;
                Ok(Actions::invoked(
                    Reveal::additive(&self.modulus, masked),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingReveal, Event::Complete(completion)) => {
                let opened = completion.output::<Vec<BigUint>>()?;
                Ok(Actions::completed(self.evaluate(&opened, ctx.is_revealer())))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}
