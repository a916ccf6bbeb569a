//! Message-driven protocol units.
//!
//! A [`Fronctocol`] is an explicit state machine: the runtime feeds it one [`Event`]
//! at a time and carries out the [`Actions`] it returns. Sub-protocols are invoked
//! as children and report back through [`Event::Complete`].

use std::{any::Any, fmt};

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

use crate::{
    identity::{Identity, PeerSet},
    wire::{MessageWriter, Wire, WireError},
};

/// Result value of a completed fronctocol.
pub type Output = Box<dyn Any + Send>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{fronctocol} cannot handle {event} in state {state}")]
    UnexpectedEvent {
        fronctocol: &'static str,
        state: String,
        event: &'static str,
    },
    #[error("{fronctocol} received a message from unexpected party {from}")]
    UnexpectedSender {
        fronctocol: &'static str,
        from: Identity,
    },
    #[error("malformed message: {0}")]
    Wire(#[from] WireError),
    #[error("child output is not a {expected}")]
    OutputType { expected: &'static str },
    #[error("peer set {peers} has no {what}")]
    MissingParty { peers: String, what: &'static str },
    #[error("unknown party {0}")]
    UnknownParty(Identity),
    #[error("randomness requests disagree: {0} vs {1}")]
    RequestMismatch(u64, u64),
    #[error("blinded matrix is singular")]
    SingularMatrix,
    #[error("instance {0} already exists")]
    DuplicateInstance(InstanceId),
    #[error("{0}")]
    Invalid(String),
}

impl ProtocolError {
    pub fn unexpected(fronctocol: &'static str, state: impl fmt::Debug, event: &Event) -> Self {
        Self::UnexpectedEvent {
            fronctocol,
            state: format!("{:?}", state),
            event: event.kind(),
        }
    }

    pub fn missing(peers: &PeerSet, what: &'static str) -> Self {
        Self::MissingParty {
            peers: peers.to_string(),
            what,
        }
    }
}

/// Identifier shared by every member's copy of one protocol instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId([u8; 32]);

impl InstanceId {
    /// Root instance of a query.
    pub fn root(query_id: &str) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(b"root");
        hasher.update(query_id.as_bytes());
        Self(hasher.finalize().into())
    }

    /// The `counter`-th child this instance invokes with `peers`.
    pub fn child(&self, peers: &PeerSet, counter: u64) -> Self {
        let mut w = MessageWriter::new();
        peers.write(&mut w);
        let mut hasher = Sha3_256::new();
        hasher.update(self.0);
        hasher.update(w.into_bytes());
        hasher.update(counter.to_be_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// View of the instance an event is delivered to.
pub struct Context<'a> {
    pub me: &'a Identity,
    pub peers: &'a PeerSet,
    pub id: &'a InstanceId,
}

impl Context<'_> {
    /// Data owner that gathers and rebroadcasts masked values.
    pub fn revealer(&self) -> Result<Identity, ProtocolError> {
        self.peers
            .revealer()
            .copied()
            .ok_or_else(|| ProtocolError::missing(self.peers, "revealer"))
    }

    pub fn is_revealer(&self) -> bool {
        self.peers.revealer() == Some(self.me)
    }

    pub fn dealer(&self) -> Result<Identity, ProtocolError> {
        self.peers
            .dealer()
            .copied()
            .ok_or_else(|| ProtocolError::missing(self.peers, "dealer"))
    }

    /// Data owners other than this party.
    pub fn other_data_owners(&self) -> impl Iterator<Item = Identity> + '_ {
        self.peers
            .data_owners()
            .filter(move |id| *id != self.me)
            .copied()
    }
}

/// Child completion as seen by its parent.
pub struct Completion {
    pub peers: PeerSet,
    pub tag: usize,
    output: Output,
}

impl Completion {
    pub fn new(peers: PeerSet, tag: usize, output: Output) -> Self {
        Self { peers, tag, output }
    }

    /// Take the child's output as `T`.
    pub fn output<T: 'static>(self) -> Result<T, ProtocolError> {
        downcast(self.output)
    }

    pub fn into_output(self) -> Output {
        self.output
    }
}

/// Downcast a fronctocol output.
pub fn downcast<T: 'static>(output: Output) -> Result<T, ProtocolError> {
    output
        .downcast::<T>()
        .map(|x| *x)
        .map_err(|_| ProtocolError::OutputType {
            expected: std::any::type_name::<T>(),
        })
}

pub enum Event {
    Init,
    Receive { from: Identity, payload: Vec<u8> },
    Complete(Completion),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Init => "init",
            Event::Receive { .. } => "receive",
            Event::Complete(_) => "complete",
        }
    }
}

pub enum Action {
    Send {
        to: Identity,
        payload: Vec<u8>,
    },
    Invoke {
        child: Box<dyn Fronctocol>,
        peers: PeerSet,
        tag: usize,
    },
    Complete(Output),
}

/// Actions produced by one step, carried out in order.
#[derive(Default)]
pub struct Actions(Vec<Action>);

impl Actions {
    pub fn none() -> Self {
        Self::default()
    }

    /// Single completion with `output`.
    pub fn completed<T: Any + Send>(output: T) -> Self {
        let mut actions = Self::none();
        actions.complete(output);
        actions
    }

    /// Single child invocation.
    pub fn invoked(child: impl Fronctocol + 'static, peers: PeerSet) -> Self {
        let mut actions = Self::none();
        actions.invoke(child, peers);
        actions
    }

    pub fn send(&mut self, to: Identity, payload: Vec<u8>) -> &mut Self {
        self.0.push(Action::Send { to, payload });
        self
    }

    pub fn broadcast(
        &mut self,
        to: impl IntoIterator<Item = Identity>,
        payload: Vec<u8>,
    ) -> &mut Self {
        for id in to {
            self.send(id, payload.clone());
        }
        self
    }

    pub fn invoke(&mut self, child: impl Fronctocol + 'static, peers: PeerSet) -> &mut Self {
        self.invoke_tagged(Box::new(child), peers, 0)
    }

    pub fn invoke_tagged(
        &mut self,
        child: Box<dyn Fronctocol>,
        peers: PeerSet,
        tag: usize,
    ) -> &mut Self {
        self.0.push(Action::Invoke { child, peers, tag });
        self
    }

    pub fn complete<T: Any + Send>(&mut self, output: T) -> &mut Self {
        self.0.push(Action::Complete(Box::new(output)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Action> {
        self.0
    }
}

/// Unit of protocol logic advanced by init, receive and child-complete events.
pub trait Fronctocol: Send {
    fn name(&self) -> &'static str;

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_ids_depend_on_peers_and_counter() {
        let root = InstanceId::root("query");
        let a: PeerSet = [Identity::data_owner(1, 0), Identity::data_owner(2, 1)]
            .into_iter()
            .collect();
        let b: PeerSet = [Identity::data_owner(1, 0)].into_iter().collect();

        assert_eq!(root, InstanceId::root("query"));
        assert_ne!(root, InstanceId::root("other"));
        assert_eq!(root.child(&a, 0), root.child(&a, 0));
        assert_ne!(root.child(&a, 0), root.child(&a, 1));
        assert_ne!(root.child(&a, 0), root.child(&b, 0));
    }

    #[test]
    fn test_completion_downcast() {
        let completion = Completion::new(PeerSet::new(), 3, Box::new(vec![1u8, 2]));
        assert_eq!(completion.tag, 3);
        assert_eq!(completion.output::<Vec<u8>>().unwrap(), vec![1, 2]);

        let completion = Completion::new(PeerSet::new(), 0, Box::new(5u32));
        assert!(matches!(
            completion.output::<String>(),
            Err(ProtocolError::OutputType { .. })
        ));
    }
}
