//! In-process execution of a protocol among several parties.
//!
//! Every party gets its own [`Runtime`]; envelopes are routed through one global
//! FIFO, so a run is deterministic given the fronctocols' own randomness.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use crate::{
    fronctocol::{Fronctocol, InstanceId, ProtocolError},
    identity::{Identity, PeerSet},
    runtime::{Outgoing, Runtime},
};

#[derive(Default)]
pub struct Simulation {
    parties: Vec<Runtime>,
    index: HashMap<Identity, usize>,
    in_flight: VecDeque<(Identity, Outgoing)>,
    delivered: usize,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a party. Adding the same identity twice is a no-op.
    pub fn add_party(&mut self, id: Identity) {
        if !self.index.contains_key(&id) {
            self.index.insert(id, self.parties.len());
            self.parties.push(Runtime::new(id));
        }
    }

    /// Start a root fronctocol at `party`.
    pub fn start(
        &mut self,
        party: Identity,
        id: InstanceId,
        fronctocol: Box<dyn Fronctocol>,
        peers: PeerSet,
    ) -> Result<(), ProtocolError> {
        self.add_party(party);
        let runtime = self.runtime_mut(&party)?;
        runtime.start(id, fronctocol, peers)?;
        self.collect(party)
    }

    /// Route messages until no party has anything left to send.
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        while let Some((from, out)) = self.in_flight.pop_front() {
            self.delivered += 1;
            let to = out.to;
            trace!(%from, %to, instance = %out.envelope.instance, "route");
            self.runtime_mut(&to)?.deliver(from, out.envelope)?;
            self.collect(to)?;
        }
        Ok(())
    }

    /// Output of a finished root instance at `party`.
    pub fn output<T: 'static>(
        &mut self,
        party: &Identity,
        id: &InstanceId,
    ) -> Result<T, ProtocolError> {
        self.runtime_mut(party)?
            .take_output(id)
            .unwrap_or_else(|| {
                Err(ProtocolError::Invalid(format!("{} has not finished {}", party, id)))
            })
    }

    pub fn is_finished(&self, party: &Identity, id: &InstanceId) -> bool {
        self.index
            .get(party)
            .map_or(false, |&i| self.parties[i].is_finished(id))
    }

    /// Number of envelopes routed so far.
    pub fn messages_delivered(&self) -> usize {
        self.delivered
    }

    fn runtime_mut(&mut self, party: &Identity) -> Result<&mut Runtime, ProtocolError> {
        let i = *self
            .index
            .get(party)
            .ok_or(ProtocolError::UnknownParty(*party))?;
        Ok(&mut self.parties[i])
    }

    fn collect(&mut self, party: Identity) -> Result<(), ProtocolError> {
        let outgoing = self.runtime_mut(&party)?.drain_outgoing();
        self.in_flight
            .extend(outgoing.into_iter().map(|out| (party, out)));
        Ok(())
    }
}
