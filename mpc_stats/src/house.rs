//! Randomness a query draws from the dealer, and the dealer's side of a query.
//!
//! A [`RandomnessOrder`] lists every kind of randomness a query consumes together
//! with its count. Data owners run [`RandomnessOrder::patrons`] and the dealer runs
//! [`RandomnessOrder::houses`]; both are batches built from the same list, so the
//! n-th patron and the n-th house land on the same instance.

use mpc::{
    fronctocol::downcast,
    protocols::batch::Batch,
    Actions, Context, Dispenser, Event, Fronctocol, Output, PeerSet, ProtocolError, RandomnessHouse,
    RandomnessInfo, RandomnessPatron,
};
use tracing::debug;

/// Members that compute a query: data owners and the dealer.
pub fn computing_peers(peers: &PeerSet) -> PeerSet {
    let mut peers = peers.clone();
    peers.remove_recipients();
    peers
}

trait Request: Send + Sync {
    fn patron(&self) -> Box<dyn Fronctocol>;

    fn house(&self) -> Box<dyn Fronctocol>;

    fn describe(&self) -> (&'static str, usize);
}

struct Counted<I> {
    info: I,
    count: usize,
}

impl<I: RandomnessInfo> Request for Counted<I> {
    fn patron(&self) -> Box<dyn Fronctocol> {
        Box::new(RandomnessPatron::new(self.info.clone(), self.count))
    }

    fn house(&self) -> Box<dyn Fronctocol> {
        Box::new(RandomnessHouse::new(self.info.clone()))
    }

    fn describe(&self) -> (&'static str, usize) {
        (self.info.name(), self.count)
    }
}

#[derive(Default)]
pub struct RandomnessOrder {
    requests: Vec<Box<dyn Request>>,
}

impl RandomnessOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` instances of `info`.
    pub fn request<I: RandomnessInfo>(mut self, info: I, count: usize) -> Self {
        self.requests.push(Box::new(Counted { info, count }));
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// `(kind, count)` of every request, in order.
    pub fn summary(&self) -> Vec<(&'static str, usize)> {
        self.requests.iter().map(|r| r.describe()).collect()
    }

    /// Data-owner side. Completes with one `Dispenser` per request, see [`Delivery`].
    pub fn patrons(&self) -> Batch {
        Batch::new(self.requests.iter().map(|r| r.patron()).collect())
    }

    /// Dealer side.
    pub fn houses(&self) -> Batch {
        Batch::new(self.requests.iter().map(|r| r.house()).collect())
    }
}

/// Dispensers produced by [`RandomnessOrder::patrons`], taken in request order.
pub struct Delivery {
    outputs: std::vec::IntoIter<Output>,
}

impl Delivery {
    pub fn new(outputs: Vec<Output>) -> Self {
        Self {
            outputs: outputs.into_iter(),
        }
    }

    pub fn next<T: 'static>(&mut self) -> Result<Dispenser<T>, ProtocolError> {
        let output = self
            .outputs
            .next()
            .ok_or_else(|| ProtocolError::Invalid("randomness delivery is short".to_string()))?;
        downcast::<Dispenser<T>>(output)
    }
}

/// Dealer root of a query: serves the query's own randomness and the join's.
///
/// Mirrors the data owners, which first invoke their patrons and then the join,
/// both with the computing peers.
pub struct QueryHouse {
    houses: Option<Batch>,
    join: Option<Box<dyn Fronctocol>>,
    remaining: usize,
}

impl QueryHouse {
    pub fn new(order: &RandomnessOrder, join: Box<dyn Fronctocol>) -> Self {
        Self {
            houses: Some(order.houses()),
            join: Some(join),
            remaining: 2,
        }
    }
}

impl Fronctocol for QueryHouse {
    fn name(&self) -> &'static str {
        "QueryHouse"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match (self.houses.take(), self.join.take(), event) {
            (Some(houses), Some(join), Event::Init) => {
                let peers = computing_peers(ctx.peers);
                debug!(%peers, "serving query randomness");
                let mut actions = Actions::none();
                actions
                    .invoke_tagged(Box::new(houses), peers.clone(), 0)
                    .invoke_tagged(join, peers, 1);
                Ok(actions)
            }
            (None, None, Event::Complete(_)) if self.remaining > 0 => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    debug!("query randomness served");
                    Ok(Actions::completed(()))
                } else {
                    Ok(Actions::none())
                }
            }
            (_, _, event) => Err(ProtocolError::unexpected(self.name(), self.remaining, &event)),
        }
    }
}
