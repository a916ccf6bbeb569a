//! Moving signed shares from a small modulus to a larger one.

use std::sync::Arc;

use num_bigint::BigUint;
use rand::Rng;

use crate::{
    arith::{bit_length, mod_add, mod_mul, mod_sub, random_mod_p},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    randomness::{additive_share_vec, additive_shares, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    bitwise::{bits_msb_first, BitwiseInfo, BitwiseLessThan, BitwiseRandomness},
    reveal::Reveal,
};

#[derive(Clone, Debug)]
pub struct ModConvUpInfo {
    pub start_modulus: BigUint,
    pub end_modulus: BigUint,
    pub bitwise: Arc<BitwiseInfo>,
}

impl ModConvUpInfo {
    pub fn new(start_modulus: &BigUint, end_modulus: &BigUint) -> Result<Self, ProtocolError> {
        if end_modulus <= start_modulus {
            return Err(ProtocolError::Invalid(
                "end modulus must exceed start modulus".to_string(),
            ));
        }
        Ok(Self {
            start_modulus: start_modulus.clone(),
            end_modulus: end_modulus.clone(),
            bitwise: Arc::new(BitwiseInfo::new(end_modulus, bit_length(start_modulus))?),
        })
    }

    /// `(p_s - 1) / 2`, the offset making signed values non-negative.
    fn half(&self) -> BigUint {
        (&self.start_modulus - 1u32) >> 1
    }
}

/// One party's randomness for one conversion: a mask known modulo both primes.
#[derive(Clone, Debug)]
pub struct ModConvUpRandomness {
    pub r_start: BigUint,
    pub r_end: BigUint,
    pub r_bits: Vec<BigUint>,
    pub bitwise: BitwiseRandomness,
}

impl RandomnessInfo for ModConvUpInfo {
    type Instance = ModConvUpRandomness;

    fn name(&self) -> &'static str {
        "ModConvUp"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<ModConvUpRandomness> {
        let (ps, pe) = (&self.start_modulus, &self.end_modulus);
        let r = random_mod_p(rng, ps);
        let r_start = additive_shares(rng, &r, parties, ps);
        let r_end = additive_shares(rng, &r, parties, pe);
        let r_bits = additive_share_vec(rng, &bits_msb_first(&r, self.bitwise.bits), parties, pe);
        let bitwise = self.bitwise.generate(parties, rng);
        itertools::izip!(r_start, r_end, r_bits, bitwise)
            .map(|(r_start, r_end, r_bits, bitwise)| ModConvUpRandomness {
                r_start,
                r_end,
                r_bits,
                bitwise,
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &ModConvUpRandomness) {
        w.write_elem(&instance.r_start, &self.start_modulus);
        w.write_elem(&instance.r_end, &self.end_modulus);
        for b in &instance.r_bits {
            w.write_elem(b, &self.end_modulus);
        }
        self.bitwise.write_instance(w, &instance.bitwise);
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<ModConvUpRandomness, WireError> {
        let r_start = r.read_elem(&self.start_modulus)?;
        let r_end = r.read_elem(&self.end_modulus)?;
        let r_bits = (0..self.bitwise.bits)
            .map(|_| r.read_elem(&self.end_modulus))
            .collect::<Result<_, _>>()?;
        Ok(ModConvUpRandomness {
            r_start,
            r_end,
            r_bits,
            bitwise: self.bitwise.read_instance(r)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingMaskedOpen,
    AwaitingWrap,
}

/// Shares modulo the end modulus of signed values shared modulo the start modulus.
///
/// With `H = (p_s - 1)/2` and `c = y + H + r mod p_s` opened, the integer
/// `y + H = c - r + p_s·[c < r]`. Completes with `Vec<BigUint>`.
pub struct ModConvUp {
    info: ModConvUpInfo,
    values: Vec<BigUint>,
    randomness: Vec<ModConvUpRandomness>,
    opened: Vec<BigUint>,
    state: State,
}

impl ModConvUp {
    pub fn new(
        info: &ModConvUpInfo,
        values: Vec<BigUint>,
        randomness: Vec<ModConvUpRandomness>,
    ) -> Self {
        assert_eq!(values.len(), randomness.len(), "one randomness bundle per value");
        Self {
            info: info.clone(),
            values,
            randomness,
            opened: Vec::new(),
            state: State::Init,
        }
    }
}

impl Fronctocol for ModConvUp {
    fn name(&self) -> &'static str {
        "ModConvUp"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let ps = self.info.start_modulus.clone();
        let pe = self.info.end_modulus.clone();
        let revealer = ctx.is_revealer();
        match (self.state, event) {
            (State::Init, Event::Init) if self.values.is_empty() => {
                Ok(Actions::completed(Vec::<BigUint>::new()))
            }
            (State::Init, Event::Init) => {
                let half = self.info.half();
                let masked = self
                    .values
                    .iter()
                    .zip(&self.randomness)
                    .map(|(y, rand)| {
                        let y = if revealer { mod_add(y, &half, &ps) } else { y.clone() };
                        mod_add(&y, &rand.r_start, &ps)
                    })
                    .collect();
                self.state = State::AwaitingMaskedOpen;
                Ok(Actions::invoked(Reveal::additive(&ps, masked), ctx.peers.clone()))
            }
            (State::AwaitingMaskedOpen, Event::Complete(completion)) => {
                self.opened = completion.output::<Vec<BigUint>>()?;
                let (r_bits, bitwise) = self
                    .randomness
                    .iter_mut()
                    .map(|rand| {
                        (std::mem::take(&mut rand.r_bits), std::mem::take(&mut rand.bitwise))
                    })
                    .unzip();
                self.state = State::AwaitingWrap;
                Ok(Actions::invoked(
                    BitwiseLessThan::new(
                        self.info.bitwise.clone(),
                        self.opened.clone(),
                        r_bits,
                        bitwise,
                    ),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingWrap, Event::Complete(completion)) => {
                let wraps = completion.output::<Vec<BigUint>>()?;
                let half = self.info.half();
                let ps_in_end = &ps % &pe;
                let converted = itertools::izip!(&self.opened, &self.randomness, &wraps)
                    .map(|(c, rand, w)| {
                        let mut share = mod_sub(&mod_mul(&ps_in_end, w, &pe), &rand.r_end, &pe);
                        if revealer {
                            share = mod_add(&share, &mod_sub(c, &half, &pe), &pe);
                        }
                        share
                    })
                    .collect::<Vec<_>>();
                Ok(Actions::completed(converted))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arith::{from_signed, prime_above_pow2, to_signed},
        identity::PeerSet,
        protocols::reveal::testing::*,
        randomness::{generate_many, testing::open_additive},
    };
    use num_bigint::BigInt;

    #[test]
    fn test_modconv_signed_values() {
        let ps = prime_above_pow2(40);
        let pe = prime_above_pow2(90);
        let info = ModConvUpInfo::new(&ps, &pe).unwrap();
        let values: Vec<i64> = vec![0, 1, -1, 123_456, -987_654, (1 << 38), -(1 << 38)];
        let n = 3;

        let mut rng = rand::thread_rng();
        let start: Vec<BigUint> = values
            .iter()
            .map(|v| from_signed(&BigInt::from(*v), &ps))
            .collect();
        let shares = additive_share_vec(&mut rng, &start, n, &ps);
        let randomness = generate_many(&info, values.len(), n, &mut rng);

        let peers: PeerSet = data_owners(n).into_iter().collect();
        let parties = itertools::izip!(peers.data_owners(), shares, randomness)
            .map(|(id, y, r)| (*id, Box::new(ModConvUp::new(&info, y, r)) as Box<dyn Fronctocol>))
            .collect();
        let outputs = in_order(&peers, run_parties::<Vec<BigUint>>(parties, peers.clone()));
        let opened: Vec<BigInt> = open_additive(&outputs, &pe)
            .iter()
            .map(|x| to_signed(x, &pe))
            .collect();
        let expected: Vec<BigInt> = values.iter().map(|v| BigInt::from(*v)).collect();
        assert_eq!(opened, expected);
    }
}
