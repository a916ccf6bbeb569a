//! Secret-sharing protocol engine.
//!
//! Protocols are written as [`Fronctocol`] state machines and driven by a per-party
//! [`runtime::Runtime`]. Correlated randomness comes from a dealer through the
//! house/patron exchange in [`randomness`].

pub mod arith;
pub mod dispenser;
pub mod fronctocol;
pub mod identity;
pub mod lagrange;
pub mod matrix;
pub mod observation;
pub mod protocols;
pub mod randomness;
pub mod runtime;
pub mod simulation;
pub mod transport;
pub mod wire;

pub use dispenser::Dispenser;
pub use fronctocol::{
    Actions, Completion, Context, Event, Fronctocol, InstanceId, Output, ProtocolError,
};
pub use identity::{Identity, PeerSet, Role};
pub use observation::{Observation, ObservationList};
pub use randomness::{RandomnessHouse, RandomnessInfo, RandomnessPatron};
