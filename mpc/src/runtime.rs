//! Per-party scheduler that drives a tree of fronctocol instances.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    fronctocol::{
        downcast, Action, Completion, Context, Event, Fronctocol, InstanceId, Output, ProtocolError,
    },
    identity::{Identity, PeerSet},
};

/// Message addressed to one protocol instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub instance: InstanceId,
    pub payload: Vec<u8>,
}

/// Envelope waiting to be sent to a party.
#[derive(Clone, Debug)]
pub struct Outgoing {
    pub to: Identity,
    pub envelope: Envelope,
}

struct Node {
    fronctocol: Box<dyn Fronctocol>,
    peers: PeerSet,
    parent: Option<InstanceId>,
    tag: usize,
    counters: HashMap<PeerSet, u64>,
    /// completed children, forgotten when this node completes
    done: Vec<InstanceId>,
}

/// Single-threaded event loop of one party.
///
/// Events are processed in FIFO order. Messages for instances that do not exist yet
/// are held back and replayed right after the instance is initialized.
pub struct Runtime {
    me: Identity,
    nodes: HashMap<InstanceId, Node>,
    finished: HashSet<InstanceId>,
    pending: HashMap<InstanceId, Vec<(Identity, Vec<u8>)>>,
    queue: VecDeque<(InstanceId, Event)>,
    outbox: Vec<Outgoing>,
    outputs: HashMap<InstanceId, Output>,
}

impl Runtime {
    pub fn new(me: Identity) -> Self {
        Self {
            me,
            nodes: HashMap::new(),
            finished: HashSet::new(),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            outbox: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn me(&self) -> &Identity {
        &self.me
    }

    /// Start a root instance and process everything it triggers.
    pub fn start(
        &mut self,
        id: InstanceId,
        fronctocol: Box<dyn Fronctocol>,
        peers: PeerSet,
    ) -> Result<(), ProtocolError> {
        debug!(%id, name = fronctocol.name(), %peers, "starting root fronctocol");
        self.create(id, fronctocol, peers, None, 0)?;
        self.run()
    }

    /// Hand an incoming envelope to its instance.
    pub fn deliver(&mut self, from: Identity, envelope: Envelope) -> Result<(), ProtocolError> {
        let Envelope { instance, payload } = envelope;
        if self.nodes.contains_key(&instance) {
            self.queue
                .push_back((instance, Event::Receive { from, payload }));
            self.run()
        } else if self.finished.contains(&instance) {
            warn!(%instance, %from, "dropping message for finished instance");
            Ok(())
        } else {
            trace!(%instance, %from, "buffering message for unknown instance");
            self.pending
                .entry(instance)
                .or_default()
                .push((from, payload));
            Ok(())
        }
    }

    /// Take every envelope produced since the last call.
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn is_finished(&self, id: &InstanceId) -> bool {
        self.finished.contains(id)
    }

    /// Take the output of a completed root instance.
    pub fn take_output<T: 'static>(&mut self, id: &InstanceId) -> Option<Result<T, ProtocolError>> {
        self.outputs.remove(id).map(downcast)
    }

    /// Number of live instances.
    pub fn num_active(&self) -> usize {
        self.nodes.len()
    }

    fn create(
        &mut self,
        id: InstanceId,
        fronctocol: Box<dyn Fronctocol>,
        peers: PeerSet,
        parent: Option<InstanceId>,
        tag: usize,
    ) -> Result<(), ProtocolError> {
        if self.nodes.contains_key(&id) || self.finished.contains(&id) {
            return Err(ProtocolError::DuplicateInstance(id));
        }
        if !peers.contains(&self.me) {
            return Err(ProtocolError::Invalid(format!(
                "{} is not a member of {}",
                self.me, peers
            )));
        }
        self.nodes.insert(
            id,
            Node {
                fronctocol,
                peers,
                parent,
                tag,
                counters: HashMap::new(),
                done: Vec::new(),
            },
        );
        self.queue.push_back((id, Event::Init));
        for (from, payload) in self.pending.remove(&id).into_iter().flatten() {
            self.queue.push_back((id, Event::Receive { from, payload }));
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), ProtocolError> {
        while let Some((id, event)) = self.queue.pop_front() {
            let node = match self.nodes.get_mut(&id) {
                Some(node) => node,
                None => {
                    warn!(%id, event = event.kind(), "dropping event for finished instance");
                    continue;
                }
            };
            let Node {
                fronctocol, peers, ..
            } = node;
            let ctx = Context {
                me: &self.me,
                peers,
                id: &id,
            };
            trace!(%id, name = fronctocol.name(), event = event.kind(), "step");
            let actions = fronctocol.step(&ctx, event)?;
            self.apply(id, actions.into_vec())?;
        }
        Ok(())
    }

    fn apply(&mut self, id: InstanceId, actions: Vec<Action>) -> Result<(), ProtocolError> {
        let mut actions = actions.into_iter();
        while let Some(action) = actions.next() {
            match action {
                Action::Send { to, payload } => {
                    if to == self.me {
                        self.queue.push_back((
                            id,
                            Event::Receive {
                                from: self.me,
                                payload,
                            },
                        ));
                    } else {
                        self.outbox.push(Outgoing {
                            to,
                            envelope: Envelope {
                                instance: id,
                                payload,
                            },
                        });
                    }
                }
                Action::Invoke { child, peers, tag } => {
                    let node = self
                        .nodes
                        .get_mut(&id)
                        .ok_or_else(|| ProtocolError::Invalid(format!("{} is gone", id)))?;
                    let counter = node.counters.entry(peers.clone()).or_insert(0);
                    let child_id = id.child(&peers, *counter);
                    *counter += 1;
                    trace!(parent = %id, child = %child_id, name = child.name(), "invoke");
                    self.create(child_id, child, peers, Some(id), tag)?;
                }
                Action::Complete(output) => {
                    if actions.next().is_some() {
                        return Err(ProtocolError::Invalid(format!(
                            "{} produced actions after completing",
                            id
                        )));
                    }
                    let node = self
                        .nodes
                        .remove(&id)
                        .ok_or_else(|| ProtocolError::Invalid(format!("{} is gone", id)))?;
                    trace!(%id, name = node.fronctocol.name(), "complete");
                    for child in &node.done {
                        self.finished.remove(child);
                        self.pending.remove(child);
                    }
                    match node.parent {
                        Some(parent) => {
                            if let Some(parent) = self.nodes.get_mut(&parent) {
                                parent.done.push(id);
                                self.finished.insert(id);
                            }
                            let completion = Completion::new(node.peers, node.tag, output);
                            self.queue.push_back((parent, Event::Complete(completion)));
                        }
                        None => {
                            debug!(%id, name = node.fronctocol.name(), "root fronctocol finished");
                            self.finished.insert(id);
                            self.outputs.insert(id, output);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
