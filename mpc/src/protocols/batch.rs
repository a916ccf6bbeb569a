//! Concurrent execution of independent fronctocols.

use crate::{
    fronctocol::{downcast, Actions, Context, Event, Fronctocol, Output, ProtocolError},
    identity::PeerSet,
};

/// Runs its children side by side and completes with their outputs, in the order
/// they were given, as `Vec<Output>`.
///
/// A child without an explicit peer set runs with the batch's own peers.
pub struct Batch {
    pending: Vec<(Box<dyn Fronctocol>, Option<PeerSet>)>,
    outputs: Vec<Option<Output>>,
    remaining: usize,
}

impl Batch {
    pub fn new(children: Vec<Box<dyn Fronctocol>>) -> Self {
        Self::with_peers(children.into_iter().map(|c| (c, None)).collect())
    }

    pub fn with_peers(children: Vec<(Box<dyn Fronctocol>, Option<PeerSet>)>) -> Self {
        let n = children.len();
        Self {
            pending: children,
            outputs: (0..n).map(|_| None).collect(),
            remaining: n,
        }
    }

    /// Downcast every output of a completed batch to `T`.
    pub fn outputs_as<T: 'static>(outputs: Vec<Output>) -> Result<Vec<T>, ProtocolError> {
        outputs.into_iter().map(downcast).collect()
    }
}

impl Fronctocol for Batch {
    fn name(&self) -> &'static str {
        "Batch"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match event {
            Event::Init if self.remaining == 0 => Ok(Actions::completed(Vec::<Output>::new())),
            Event::Init => {
                let mut actions = Actions::none();
                for (tag, (child, peers)) in self.pending.drain(..).enumerate() {
                    let peers = peers.unwrap_or_else(|| ctx.peers.clone());
                    actions.invoke_tagged(child, peers, tag);
                }
                Ok(actions)
            }
            Event::Complete(completion) => {
                let tag = completion.tag;
                let slot = self
                    .outputs
                    .get_mut(tag)
                    .filter(|slot| slot.is_none())
                    .ok_or_else(|| {
                        ProtocolError::Invalid(format!(
                            "batch child {} completed twice or does not exist",
                            tag
                        ))
                    })?;
                *slot = Some(completion.into_output());
                self.remaining -= 1;
                if self.remaining > 0 {
                    return Ok(Actions::none());
                }
                let outputs: Vec<Output> = self.outputs.drain(..).flatten().collect();
                Ok(Actions::completed(outputs))
            }
            event => Err(ProtocolError::unexpected(self.name(), self.remaining, &event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;

    use super::*;
    use crate::{
        identity::PeerSet,
        protocols::reveal::{testing::*, Reveal},
        randomness::{additive_share_vec, xor_share_vec},
    };

    #[test]
    fn test_batch_of_mixed_reveals() {
        let p = BigUint::from(1_000_003u32);
        let n = 3;
        let mut rng = rand::thread_rng();
        let numbers = additive_share_vec(
            &mut rng,
            &[BigUint::from(77u32), BigUint::from(5u32)],
            n,
            &p,
        );
        let bits = xor_share_vec(&mut rng, &[true, false], n);

        let peers: PeerSet = data_owners(n).into_iter().collect();
        let parties = itertools::izip!(peers.data_owners(), numbers, bits)
            .map(|(id, x, b)| {
                let batch = Batch::new(vec![
                    Box::new(Reveal::additive(&p, x)),
                    Box::new(Reveal::xor(b)),
                    Box::new(Batch::new(Vec::new())),
                ]);
                (*id, Box::new(batch) as Box<dyn Fronctocol>)
            })
            .collect();
        for (_, mut outputs) in run_parties::<Vec<Output>>(parties, peers) {
            assert_eq!(outputs.len(), 3);
            let nested = Batch::outputs_as::<Vec<Output>>(outputs.split_off(2)).unwrap();
            assert!(nested[0].is_empty());
            let bits = downcast::<Vec<bool>>(outputs.pop().unwrap()).unwrap();
            let numbers = downcast::<Vec<BigUint>>(outputs.pop().unwrap()).unwrap();
            assert_eq!(numbers, vec![BigUint::from(77u32), BigUint::from(5u32)]);
            assert_eq!(bits, vec![true, false]);
        }
    }
}
