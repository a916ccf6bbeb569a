//! Correlated randomness: generation by the dealer and delivery to data owners.
//!
//! Every kind of randomness is described by a [`RandomnessInfo`]. The dealer runs a
//! [`RandomnessHouse`] for it and each data owner runs a matching
//! [`RandomnessPatron`], which ends with a [`Dispenser`] of this party's shares.

use num_bigint::BigUint;
use rand::Rng;
use tracing::debug;

use crate::{
    arith::{mod_sub, random_mod_p},
    dispenser::Dispenser,
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    identity::Identity,
    wire::{MessageReader, MessageWriter, WireError},
};

/// Parameters of one kind of correlated randomness.
pub trait RandomnessInfo: Clone + Send + Sync + 'static {
    /// One party's share of one instance.
    type Instance: Send + 'static;

    fn name(&self) -> &'static str;

    /// Generate one instance, returned as one share per party.
    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<Self::Instance>;

    fn write_instance(&self, w: &mut MessageWriter, instance: &Self::Instance);

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<Self::Instance, WireError>;
}

/// Additive sharing of `x` modulo `p` among `n` parties.
pub fn additive_shares<R: Rng + ?Sized>(
    rng: &mut R,
    x: &BigUint,
    n: usize,
    p: &BigUint,
) -> Vec<BigUint> {
    let mut shares: Vec<BigUint> = (1..n).map(|_| random_mod_p(rng, p)).collect();
    let sum = shares.iter().fold(BigUint::default(), |acc, s| (acc + s) % p);
    shares.push(mod_sub(&(x % p), &sum, p));
    shares
}

/// XOR sharing of a bit among `n` parties.
pub fn xor_shares<R: Rng + ?Sized>(rng: &mut R, bit: bool, n: usize) -> Vec<bool> {
    let mut shares: Vec<bool> = (1..n).map(|_| rng.gen()).collect();
    let acc = shares.iter().fold(false, |acc, s| acc ^ s);
    shares.push(bit ^ acc);
    shares
}

/// Share every element of `xs`, returning one vector per party.
pub fn additive_share_vec<R: Rng + ?Sized>(
    rng: &mut R,
    xs: &[BigUint],
    n: usize,
    p: &BigUint,
) -> Vec<Vec<BigUint>> {
    let mut out = vec![Vec::with_capacity(xs.len()); n];
    for x in xs {
        for (party, share) in additive_shares(rng, x, n, p).into_iter().enumerate() {
            out[party].push(share);
        }
    }
    out
}

/// XOR-share every bit of `bits`, returning one vector per party.
pub fn xor_share_vec<R: Rng + ?Sized>(rng: &mut R, bits: &[bool], n: usize) -> Vec<Vec<bool>> {
    let mut out = vec![Vec::with_capacity(bits.len()); n];
    for &bit in bits {
        for (party, share) in xor_shares(rng, bit, n).into_iter().enumerate() {
            out[party].push(share);
        }
    }
    out
}

/// Turn per-item share vectors (`items[i][party]`) into per-party vectors.
pub fn transpose<T>(items: Vec<Vec<T>>, parties: usize) -> Vec<Vec<T>> {
    let mut out: Vec<Vec<T>> = (0..parties).map(|_| Vec::with_capacity(items.len())).collect();
    for shares in items {
        for (party, share) in shares.into_iter().enumerate() {
            out[party].push(share);
        }
    }
    out
}

/// Generate `count` instances of `info` per party.
pub fn generate_many<I: RandomnessInfo, R: Rng + ?Sized>(
    info: &I,
    count: usize,
    parties: usize,
    rng: &mut R,
) -> Vec<Vec<I::Instance>> {
    transpose(
        (0..count).map(|_| info.generate(parties, rng)).collect(),
        parties,
    )
}

/// Data-owner side: request `count` instances from the dealer.
pub struct RandomnessPatron<I: RandomnessInfo> {
    info: I,
    count: u64,
    state: PatronState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PatronState {
    Init,
    AwaitingHouse,
}

impl<I: RandomnessInfo> RandomnessPatron<I> {
    pub fn new(info: I, count: usize) -> Self {
        Self {
            info,
            count: count as u64,
            state: PatronState::Init,
        }
    }
}

impl<I: RandomnessInfo> Fronctocol for RandomnessPatron<I> {
    fn name(&self) -> &'static str {
        "RandomnessPatron"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match (self.state, event) {
            (PatronState::Init, Event::Init) => {
                let dealer = ctx.dealer()?;
                let mut w = MessageWriter::new();
                w.write_u64(self.count);
                self.state = PatronState::AwaitingHouse;
                let mut actions = Actions::none();
                actions.send(dealer, w.into_bytes());
                Ok(actions)
            }
            (PatronState::AwaitingHouse, Event::Receive { from, payload }) => {
                if Some(&from) != ctx.peers.dealer() {
                    return Err(ProtocolError::UnexpectedSender {
                        fronctocol: self.name(),
                        from,
                    });
                }
                let mut r = MessageReader::new(&payload);
                let instances = (0..self.count)
                    .map(|_| self.info.read_instance(&mut r))
                    .collect::<Result<Vec<_>, _>>()?;
                r.finish()?;
                debug!(kind = self.info.name(), count = self.count, "randomness received");
                Ok(Actions::completed(Dispenser::new(instances)))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

/// Dealer side: serve one request from every data owner.
pub struct RandomnessHouse<I: RandomnessInfo> {
    info: I,
    requests: Vec<(Identity, u64)>,
}

impl<I: RandomnessInfo> RandomnessHouse<I> {
    pub fn new(info: I) -> Self {
        Self {
            info,
            requests: Vec::new(),
        }
    }

    fn serve(&self, ctx: &Context<'_>) -> Result<Actions, ProtocolError> {
        let count = self.requests[0].1;
        if let Some((_, other)) = self.requests.iter().find(|(_, c)| *c != count) {
            return Err(ProtocolError::RequestMismatch(count, *other));
        }

        let owners: Vec<Identity> = ctx.peers.data_owners().copied().collect();
        let mut rng = rand::thread_rng();
        let mut writers: Vec<MessageWriter> = owners.iter().map(|_| MessageWriter::new()).collect();
        for _ in 0..count {
            let shares = self.info.generate(owners.len(), &mut rng);
            for (w, share) in writers.iter_mut().zip(shares.iter()) {
                self.info.write_instance(w, share);
            }
        }
        debug!(kind = self.info.name(), count, parties = owners.len(), "randomness dealt");

        let mut actions = Actions::none();
        for (owner, w) in owners.into_iter().zip(writers) {
            actions.send(owner, w.into_bytes());
        }
        actions.complete(());
        Ok(actions)
    }
}

impl<I: RandomnessInfo> Fronctocol for RandomnessHouse<I> {
    fn name(&self) -> &'static str {
        "RandomnessHouse"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match event {
            Event::Init if ctx.peers.num_data_owners() == 0 => Ok(Actions::completed(())),
            Event::Init => Ok(Actions::none()),
            Event::Receive { from, payload } => {
                if !from.is_data_owner()
                    || !ctx.peers.contains(&from)
                    || self.requests.iter().any(|(id, _)| *id == from)
                {
                    return Err(ProtocolError::UnexpectedSender {
                        fronctocol: self.name(),
                        from,
                    });
                }
                let mut r = MessageReader::new(&payload);
                let count = r.read_u64()?;
                r.finish()?;
                self.requests.push((from, count));
                if self.requests.len() == ctx.peers.num_data_owners() {
                    self.serve(ctx)
                } else {
                    Ok(Actions::none())
                }
            }
            event => Err(ProtocolError::unexpected(self.name(), "serving", &event)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Reconstruct an additively shared vector.
    pub fn open_additive(shares: &[Vec<BigUint>], p: &BigUint) -> Vec<BigUint> {
        let mut out = vec![BigUint::default(); shares[0].len()];
        for party in shares {
            for (acc, s) in out.iter_mut().zip(party) {
                *acc = (&*acc + s) % p;
            }
        }
        out
    }

    /// Reconstruct an XOR shared vector.
    pub fn open_xor(shares: &[Vec<bool>]) -> Vec<bool> {
        let mut out = vec![false; shares[0].len()];
        for party in shares {
            for (acc, s) in out.iter_mut().zip(party) {
                *acc ^= s;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fronctocol::InstanceId, identity::PeerSet, randomness::testing::*, simulation::Simulation,
    };

    #[derive(Clone)]
    struct ScalarInfo {
        modulus: BigUint,
    }

    impl RandomnessInfo for ScalarInfo {
        type Instance = BigUint;

        fn name(&self) -> &'static str {
            "Scalar"
        }

        fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<BigUint> {
            additive_shares(rng, &BigUint::from(42u32), parties, &self.modulus)
        }

        fn write_instance(&self, w: &mut MessageWriter, instance: &BigUint) {
            w.write_elem(instance, &self.modulus);
        }

        fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<BigUint, WireError> {
            r.read_elem(&self.modulus)
        }
    }

    #[test]
    fn test_shares_reconstruct() {
        let p = BigUint::from(1_000_003u32);
        let mut rng = rand::thread_rng();
        let shares = additive_share_vec(&mut rng, &[BigUint::from(17u32)], 4, &p);
        assert_eq!(open_additive(&shares, &p), vec![BigUint::from(17u32)]);

        let bits = xor_share_vec(&mut rng, &[true, false, true], 3);
        assert_eq!(open_xor(&bits), vec![true, false, true]);
    }

    #[test]
    fn test_house_and_patrons() {
        let info = ScalarInfo {
            modulus: BigUint::from(101u32),
        };
        let owners = [
            Identity::data_owner(1, 0),
            Identity::data_owner(2, 1),
            Identity::data_owner(3, 1),
        ];
        let dealer = Identity::dealer(9);
        let peers: PeerSet = owners.iter().copied().chain([dealer]).collect();
        let id = InstanceId::root("randomness");

        let mut sim = Simulation::new();
        sim.start(dealer, id, Box::new(RandomnessHouse::new(info.clone())), peers.clone())
            .unwrap();
        for owner in owners {
            sim.start(owner, id, Box::new(RandomnessPatron::new(info.clone(), 5)), peers.clone())
                .unwrap();
        }
        sim.run().unwrap();

        let shares: Vec<Vec<BigUint>> = owners
            .iter()
            .map(|owner| sim.output::<Dispenser<BigUint>>(owner, &id).unwrap().into_vec())
            .collect();
        assert_eq!(open_additive(&shares, &info.modulus), vec![BigUint::from(42u32); 5]);
        assert!(sim.is_finished(&dealer, &id));
    }

    #[test]
    fn test_mismatched_requests_fail() {
        let info = ScalarInfo {
            modulus: BigUint::from(101u32),
        };
        let a = Identity::data_owner(1, 0);
        let b = Identity::data_owner(2, 1);
        let dealer = Identity::dealer(9);
        let peers: PeerSet = [a, b, dealer].into_iter().collect();
        let id = InstanceId::root("mismatch");

        let mut sim = Simulation::new();
        sim.start(dealer, id, Box::new(RandomnessHouse::new(info.clone())), peers.clone())
            .unwrap();
        sim.start(a, id, Box::new(RandomnessPatron::new(info.clone(), 2)), peers.clone())
            .unwrap();
        sim.start(b, id, Box::new(RandomnessPatron::new(info, 3)), peers)
            .unwrap();
        assert!(matches!(sim.run(), Err(ProtocolError::RequestMismatch(2, 3))));
    }
}
