//! Beaver-triple multiplication of shared vectors.

use num_bigint::BigUint;
use rand::Rng;

use crate::{
    arith::{mod_add, mod_mul, mod_sub, random_mod_p},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    randomness::{additive_shares, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::reveal::Reveal;

/// One party's share of `(a, b, c)` with `a * b = c`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaverTriple {
    pub a: BigUint,
    pub b: BigUint,
    pub c: BigUint,
}

impl BeaverTriple {
    pub(crate) fn generate<R: Rng + ?Sized>(
        modulus: &BigUint,
        parties: usize,
        rng: &mut R,
    ) -> Vec<Self> {
        let a = random_mod_p(rng, modulus);
        let b = random_mod_p(rng, modulus);
        let c = mod_mul(&a, &b, modulus);
        let a = additive_shares(rng, &a, parties, modulus);
        let b = additive_shares(rng, &b, parties, modulus);
        let c = additive_shares(rng, &c, parties, modulus);
        itertools::izip!(a, b, c)
            .map(|(a, b, c)| Self { a, b, c })
            .collect()
    }

    pub(crate) fn write(&self, w: &mut MessageWriter, modulus: &BigUint) {
        w.write_elem(&self.a, modulus);
        w.write_elem(&self.b, modulus);
        w.write_elem(&self.c, modulus);
    }

    pub(crate) fn read(r: &mut MessageReader<'_>, modulus: &BigUint) -> Result<Self, WireError> {
        Ok(Self {
            a: r.read_elem(modulus)?,
            b: r.read_elem(modulus)?,
            c: r.read_elem(modulus)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct BeaverInfo {
    pub modulus: BigUint,
}

impl BeaverInfo {
    pub fn new(modulus: BigUint) -> Self {
        Self { modulus }
    }
}

impl RandomnessInfo for BeaverInfo {
    type Instance = BeaverTriple;

    fn name(&self) -> &'static str {
        "BeaverTriple"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<BeaverTriple> {
        BeaverTriple::generate(&self.modulus, parties, rng)
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &BeaverTriple) {
        instance.write(w, &self.modulus);
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<BeaverTriple, WireError> {
        BeaverTriple::read(r, &self.modulus)
    }
}

/// A fixed number of triples handed out as one instance.
#[derive(Clone, Debug)]
pub struct TripleBundleInfo {
    pub modulus: BigUint,
    pub size: usize,
}

impl TripleBundleInfo {
    pub fn new(modulus: BigUint, size: usize) -> Self {
        Self { modulus, size }
    }
}

impl RandomnessInfo for TripleBundleInfo {
    type Instance = Vec<BeaverTriple>;

    fn name(&self) -> &'static str {
        "TripleBundle"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<Vec<BeaverTriple>> {
        let items = (0..self.size)
            .map(|_| BeaverTriple::generate(&self.modulus, parties, rng))
            .collect();
        crate::randomness::transpose(items, parties)
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &Vec<BeaverTriple>) {
        for triple in instance {
            triple.write(w, &self.modulus);
        }
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<Vec<BeaverTriple>, WireError> {
        (0..self.size)
            .map(|_| BeaverTriple::read(r, &self.modulus))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingReveal,
}

/// Elementwise product of two shared vectors. Completes with `Vec<BigUint>`.
pub struct Multiply {
    modulus: BigUint,
    x: Vec<BigUint>,
    y: Vec<BigUint>,
    triples: Vec<BeaverTriple>,
    state: State,
}

impl Multiply {
    pub fn new(
        modulus: &BigUint,
        x: Vec<BigUint>,
        y: Vec<BigUint>,
        triples: Vec<BeaverTriple>,
    ) -> Self {
        assert_eq!(x.len(), y.len(), "multiplicand lengths differ");
        assert_eq!(x.len(), triples.len(), "one triple per product");
        Self {
            modulus: modulus.clone(),
            x,
            y,
            triples,
            state: State::Init,
        }
    }
}

impl Fronctocol for Multiply {
    fn name(&self) -> &'static str {
        "Multiply"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let p = &self.modulus;
        match (self.state, event) {
            (State::Init, Event::Init) if self.x.is_empty() => {
                Ok(Actions::completed(Vec::<BigUint>::new()))
            }
            (State::Init, Event::Init) => {
                let n = self.x.len();
                let mut masked = Vec::with_capacity(2 * n);
                masked.extend(self.x.iter().zip(&self.triples).map(|(x, t)| mod_sub(x, &t.a, p)));
                masked.extend(self.y.iter().zip(&self.triples).map(|(y, t)| mod_sub(y, &t.b, p)));
                self.state = State::AwaitingReveal;
                Ok(Actions::invoked(Reveal::additive(p, masked), ctx.peers.clone()))
            }
            (State::AwaitingReveal, Event::Complete(completion)) => {
                let opened = completion.output::<Vec<BigUint>>()?;
                let (d, e) = opened.split_at(self.x.len());
                let revealer = ctx.is_revealer();
                let products: Vec<BigUint> = itertools::izip!(&self.triples, d, e)
                    .map(|(t, d, e)| {
                        let mut z = mod_add(&t.c, &mod_mul(d, &t.b, p), p);
                        z = mod_add(&z, &mod_mul(e, &t.a, p), p);
                        if revealer {
                            z = mod_add(&z, &mod_mul(d, e, p), p);
                        }
                        z
                    })
                    .collect();
                Ok(Actions::completed(products))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arith::prime_above_pow2,
        identity::PeerSet,
        protocols::reveal::testing::*,
        randomness::{additive_share_vec, generate_many, testing::open_additive},
    };

    #[test]
    fn test_multiply() {
        for n in [1, 2, 4] {
            let p = prime_above_pow2(61);
            let mut rng = rand::thread_rng();
            let xs: Vec<BigUint> = (0..6).map(|_| random_mod_p(&mut rng, &p)).collect();
            let ys: Vec<BigUint> = (0..6).map(|_| random_mod_p(&mut rng, &p)).collect();
            let x_shares = additive_share_vec(&mut rng, &xs, n, &p);
            let y_shares = additive_share_vec(&mut rng, &ys, n, &p);
            let triples = generate_many(&BeaverInfo::new(p.clone()), xs.len(), n, &mut rng);

            let peers: PeerSet = data_owners(n).into_iter().collect();
            let parties = itertools::izip!(peers.data_owners(), x_shares, y_shares, triples)
                .map(|(id, x, y, t)| {
                    (*id, Box::new(Multiply::new(&p, x, y, t)) as Box<dyn Fronctocol>)
                })
                .collect();
            let outputs = in_order(&peers, run_parties::<Vec<BigUint>>(parties, peers.clone()));

            let expected: Vec<BigUint> = xs
                .iter()
                .zip(&ys)
                .map(|(x, y)| mod_mul(x, y, &p))
                .collect();
            assert_eq!(open_additive(&outputs, &p), expected);
        }
    }

    #[test]
    fn test_empty_multiply_completes() {
        let p = BigUint::from(101u32);
        let peers: PeerSet = data_owners(2).into_iter().collect();
        let parties = peers
            .data_owners()
            .map(|id| {
                (*id, Box::new(Multiply::new(&p, vec![], vec![], vec![])) as Box<dyn Fronctocol>)
            })
            .collect();
        let outputs = run_parties::<Vec<BigUint>>(parties, peers);
        assert!(outputs.values().all(Vec::is_empty));
    }
}
