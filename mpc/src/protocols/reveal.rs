//! Opening of shared vectors through the revealer.

use std::fmt;

use num_bigint::BigUint;

use crate::{
    arith::mod_add,
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    identity::Identity,
    wire::{MessageReader, MessageWriter, WireError},
};

/// How shares of one value combine.
pub trait Sharing: Clone + Send + 'static {
    type Value: Clone + Send + fmt::Debug + 'static;

    fn combine(&self, acc: &mut Self::Value, share: &Self::Value);

    fn write(&self, w: &mut MessageWriter, values: &[Self::Value]);

    fn read(&self, r: &mut MessageReader<'_>) -> Result<Vec<Self::Value>, WireError>;
}

/// Shares summed modulo a prime.
#[derive(Clone, Debug)]
pub struct Additive {
    pub modulus: BigUint,
}

impl Additive {
    pub fn new(modulus: BigUint) -> Self {
        Self { modulus }
    }
}

impl Sharing for Additive {
    type Value = BigUint;

    fn combine(&self, acc: &mut BigUint, share: &BigUint) {
        *acc = mod_add(acc, share, &self.modulus);
    }

    fn write(&self, w: &mut MessageWriter, values: &[BigUint]) {
        w.write_elems(values, &self.modulus);
    }

    fn read(&self, r: &mut MessageReader<'_>) -> Result<Vec<BigUint>, WireError> {
        r.read_elems(&self.modulus)
    }
}

/// Single bits combined by XOR.
#[derive(Clone, Copy, Debug)]
pub struct Xor;

impl Sharing for Xor {
    type Value = bool;

    fn combine(&self, acc: &mut bool, share: &bool) {
        *acc ^= share;
    }

    fn write(&self, w: &mut MessageWriter, values: &[bool]) {
        w.write_bits(values);
    }

    fn read(&self, r: &mut MessageReader<'_>) -> Result<Vec<bool>, WireError> {
        r.read_bits()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    Gathering,
    AwaitingRevealer,
}

/// Every data owner learns the combined value of a shared vector.
///
/// Non-revealers send their shares to the revealer, which combines them and
/// broadcasts the result. Completes with `Vec<S::Value>`.
pub struct Reveal<S: Sharing> {
    sharing: S,
    values: Vec<S::Value>,
    received: Vec<Identity>,
    state: State,
}

impl<S: Sharing> Reveal<S> {
    pub fn new(sharing: S, shares: Vec<S::Value>) -> Self {
        Self {
            sharing,
            values: shares,
            received: Vec::new(),
            state: State::Init,
        }
    }

    fn read_shares(&self, payload: &[u8]) -> Result<Vec<S::Value>, ProtocolError> {
        let mut r = MessageReader::new(payload);
        let shares = self.sharing.read(&mut r)?;
        r.finish()?;
        if shares.len() != self.values.len() {
            return Err(ProtocolError::Invalid(format!(
                "reveal of {} values received {}",
                self.values.len(),
                shares.len()
            )));
        }
        Ok(shares)
    }
}

impl Reveal<Additive> {
    pub fn additive(modulus: &BigUint, shares: Vec<BigUint>) -> Self {
        Self::new(Additive::new(modulus.clone()), shares)
    }
}

impl Reveal<Xor> {
    pub fn xor(shares: Vec<bool>) -> Self {
        Self::new(Xor, shares)
    }
}

impl<S: Sharing> Fronctocol for Reveal<S> {
    fn name(&self) -> &'static str {
        "Reveal"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let revealer = ctx.revealer()?;
        let others = ctx.peers.num_data_owners() - 1;
        match (self.state, event) {
            (State::Init, Event::Init) if others == 0 => {
                Ok(Actions::completed(std::mem::take(&mut self.values)))
            }
            (State::Init, Event::Init) if ctx.is_revealer() => {
                self.state = State::Gathering;
                Ok(Actions::none())
            }
            (State::Init, Event::Init) => {
                let mut w = MessageWriter::new();
                self.sharing.write(&mut w, &self.values);
                self.state = State::AwaitingRevealer;
                let mut actions = Actions::none();
                actions.send(revealer, w.into_bytes());
                Ok(actions)
            }
            (State::Gathering, Event::Receive { from, payload }) => {
                if !ctx.peers.contains(&from) || from == revealer || self.received.contains(&from) {
                    return Err(ProtocolError::UnexpectedSender {
                        fronctocol: self.name(),
                        from,
                    });
                }
                let shares = self.read_shares(&payload)?;
                for (acc, share) in self.values.iter_mut().zip(&shares) {
                    self.sharing.combine(acc, share);
                }
                self.received.push(from);
                if self.received.len() < others {
                    return Ok(Actions::none());
                }
                let mut w = MessageWriter::new();
                self.sharing.write(&mut w, &self.values);
                let mut actions = Actions::none();
                actions.broadcast(ctx.other_data_owners(), w.into_bytes());
                actions.complete(std::mem::take(&mut self.values));
                Ok(actions)
            }
            (State::AwaitingRevealer, Event::Receive { from, payload }) => {
                if from != revealer {
                    return Err(ProtocolError::UnexpectedSender {
                        fronctocol: self.name(),
                        from,
                    });
                }
                let opened = self.read_shares(&payload)?;
                Ok(Actions::completed(opened))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}


#[cfg(test)]
mod tests {
    use num_bigint::BigUint;

    use super::{testing::*, *};
    use crate::{identity::PeerSet, randomness::additive_share_vec, randomness::xor_share_vec};

    #[test]
    fn test_reveal_additive() {
        for n in [1, 2, 5] {
            let p = BigUint::from(1_000_003u32);
            let secret: Vec<BigUint> = (0..4u32).map(|x| BigUint::from(x * 1000 + 7)).collect();
            let shares = additive_share_vec(&mut rand::thread_rng(), &secret, n, &p);
            let owners = data_owners(n);
            let peers: PeerSet = owners.iter().copied().collect();
            let parties = peers
                .data_owners()
                .zip(shares)
                .map(|(id, s)| (*id, Box::new(Reveal::additive(&p, s)) as Box<dyn Fronctocol>))
                .collect();
            let outputs = run_parties::<Vec<BigUint>>(parties, peers);
            for opened in outputs.values() {
                assert_eq!(opened, &secret);
            }
        }
    }

    #[test]
    fn test_reveal_xor() {
        let secret = vec![true, true, false, true];
        let shares = xor_share_vec(&mut rand::thread_rng(), &secret, 3);
        let peers: PeerSet = data_owners(3).into_iter().collect();
        let parties = peers
            .data_owners()
            .zip(shares)
            .map(|(id, s)| (*id, Box::new(Reveal::xor(s)) as Box<dyn Fronctocol>))
            .collect();
        let outputs = run_parties::<Vec<bool>>(parties, peers);
        assert!(outputs.values().all(|opened| opened == &secret));
    }
}
