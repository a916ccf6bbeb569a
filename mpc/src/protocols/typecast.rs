//! Conversion of XOR-shared bits into additive shares.

use num_bigint::BigUint;
use rand::Rng;

use crate::{
    arith::{mod_add, mod_neg},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    randomness::{additive_shares, xor_shares, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::reveal::Reveal;

/// One party's share of a random bit held both as XOR share and modulo a prime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaBit {
    pub xor: bool,
    pub arith: BigUint,
}

impl DaBit {
    pub(crate) fn generate<R: Rng + ?Sized>(
        modulus: &BigUint,
        parties: usize,
        rng: &mut R,
    ) -> Vec<Self> {
        let bit: bool = rng.gen();
        let xor = xor_shares(rng, bit, parties);
        let arith = additive_shares(rng, &BigUint::from(bit as u32), parties, modulus);
        xor.into_iter()
            .zip(arith)
            .map(|(xor, arith)| Self { xor, arith })
            .collect()
    }

    pub(crate) fn write(&self, w: &mut MessageWriter, modulus: &BigUint) {
        w.write_bool(self.xor);
        w.write_elem(&self.arith, modulus);
    }

    pub(crate) fn read(r: &mut MessageReader<'_>, modulus: &BigUint) -> Result<Self, WireError> {
        Ok(Self {
            xor: r.read_bool()?,
            arith: r.read_elem(modulus)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TypeCastInfo {
    pub modulus: BigUint,
}

impl TypeCastInfo {
    pub fn new(modulus: BigUint) -> Self {
        Self { modulus }
    }
}

impl RandomnessInfo for TypeCastInfo {
    type Instance = DaBit;

    fn name(&self) -> &'static str {
        "TypeCastFromBit"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<DaBit> {
        DaBit::generate(&self.modulus, parties, rng)
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &DaBit) {
        instance.write(w, &self.modulus);
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<DaBit, WireError> {
        DaBit::read(r, &self.modulus)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingReveal,
}

/// Additive shares modulo `modulus` of XOR-shared bits. Completes with `Vec<BigUint>`.
pub struct TypeCastFromBit {
    modulus: BigUint,
    bits: Vec<bool>,
    dabits: Vec<DaBit>,
    state: State,
}

impl TypeCastFromBit {
    pub fn new(modulus: &BigUint, bits: Vec<bool>, dabits: Vec<DaBit>) -> Self {
        assert_eq!(bits.len(), dabits.len(), "one dabit per bit");
        Self {
            modulus: modulus.clone(),
            bits,
            dabits,
            state: State::Init,
        }
    }
}

impl Fronctocol for TypeCastFromBit {
    fn name(&self) -> &'static str {
        "TypeCastFromBit"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match (self.state, event) {
            (State::Init, Event::Init) if self.bits.is_empty() => {
                Ok(Actions::completed(Vec::<BigUint>::new()))
            }
            (State::Init, Event::Init) => {
                let masked = self
                    .bits
                    .iter()
                    .zip(&self.dabits)
                    .map(|(b, t)| b ^ t.xor)
                    .collect();
                self.state = State::AwaitingReveal;
                Ok(Actions::invoked(Reveal::xor(masked), ctx.peers.clone()))
            }
            (State::AwaitingReveal, Event::Complete(completion)) => {
                let opened = completion.output::<Vec<bool>>()?;
                let p = &self.modulus;
                let revealer = ctx.is_revealer();
                // b = e ⊕ t = e + t - 2et
                let shares: Vec<BigUint> = opened
                    .iter()
                    .zip(&self.dabits)
                    .map(|(&e, t)| {
                        if e {
                            let flipped = mod_neg(&t.arith, p);
                            if revealer {
                                mod_add(&flipped, &BigUint::from(1u32), p)
                            } else {
                                flipped
                            }
                        } else {
                            t.arith.clone()
                        }
                    })
                    .collect();
                Ok(Actions::completed(shares))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::PeerSet,
        protocols::reveal::testing::*,
        randomness::{generate_many, testing::open_additive, xor_share_vec},
    };

    #[test]
    fn test_typecast() {
        let p = BigUint::from(1_000_003u32);
        let bits = vec![false, true, true, false, true];
        for n in [1, 3] {
            let mut rng = rand::thread_rng();
            let shares = xor_share_vec(&mut rng, &bits, n);
            let dabits = generate_many(&TypeCastInfo::new(p.clone()), bits.len(), n, &mut rng);
            let peers: PeerSet = data_owners(n).into_iter().collect();
            let parties = itertools::izip!(peers.data_owners(), shares, dabits)
                .map(|(id, b, t)| {
                    (*id, Box::new(TypeCastFromBit::new(&p, b, t)) as Box<dyn Fronctocol>)
                })
                .collect();
            let outputs = in_order(&peers, run_parties::<Vec<BigUint>>(parties, peers.clone()));
            let expected: Vec<BigUint> = bits.iter().map(|&b| BigUint::from(b as u32)).collect();
            assert_eq!(open_additive(&outputs, &p), expected);
        }
    }
}
