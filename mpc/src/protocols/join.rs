//! Private inner join of two data owners' rows followed by an aggregate.
//!
//! Both parties feed their share of the concatenated list. The pipeline sorts it,
//! gates adjacent pairs by key equality, reduces every pair and sums the results.
//! The dealer side only serves the randomness.

use num_bigint::BigUint;
use tracing::debug;

use crate::{
    dispenser::Dispenser,
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    observation::ObservationList,
    randomness::{RandomnessHouse, RandomnessInfo, RandomnessPatron},
};

use super::{
    sort::{num_comparisons, SisoSort, SisoSortInfo, SortSwapRandomness},
    zip::{
        column_sums, RowPair, ZipAdjacent, ZipAdjacentInfo, ZipAdjacentRandomness, ZipReduce,
        ZipReduceFactory,
    },
};

const SORT_TAG: usize = 0;
const ZIP_TAG: usize = 1;
const REDUCE_TAG: usize = 2;

type FactoryInstance<F> = <<F as ZipReduceFactory>::Info as RandomnessInfo>::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    AwaitingRandomness,
    AwaitingSort,
    AwaitingZipAdjacent,
    AwaitingZipReduce,
}

/// Data-owner side. Runs with both data owners and the dealer; completes with
/// shares, among the two data owners, of the column sums of the reduced rows.
pub struct PrivateJoin<F: ZipReduceFactory> {
    sort: SisoSortInfo,
    zip: ZipAdjacentInfo,
    factory: F,
    list: ObservationList,
    sort_randomness: Option<Vec<SortSwapRandomness>>,
    zip_randomness: Option<Vec<ZipAdjacentRandomness>>,
    reduce_randomness: Option<Vec<FactoryInstance<F>>>,
    state: State,
}

impl<F: ZipReduceFactory> PrivateJoin<F> {
    pub fn new(
        sort: SisoSortInfo,
        zip: ZipAdjacentInfo,
        factory: F,
        list: ObservationList,
    ) -> Self {
        Self {
            sort,
            zip,
            factory,
            list,
            sort_randomness: None,
            zip_randomness: None,
            reduce_randomness: None,
            state: State::Init,
        }
    }

    fn has_randomness(&self) -> bool {
        self.sort_randomness.is_some()
            && self.zip_randomness.is_some()
            && self.reduce_randomness.is_some()
    }

    fn compute_peers(ctx: &Context<'_>) -> crate::identity::PeerSet {
        let mut peers = ctx.peers.clone();
        peers.remove_dealer();
        peers
    }
}

impl<F: ZipReduceFactory> Fronctocol for PrivateJoin<F> {
    fn name(&self) -> &'static str {
        "PrivateJoin"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match (self.state, event) {
            (State::Init, Event::Init) => {
                if ctx.peers.num_data_owners() != 2 {
                    return Err(ProtocolError::Invalid(format!(
                        "private join needs two data owners, got {}",
                        ctx.peers.num_data_owners()
                    )));
                }
                let n = self.list.len();
                let pairs = n.saturating_sub(1);
                let mut actions = Actions::none();
                actions
                    .invoke_tagged(
                        Box::new(RandomnessPatron::new(self.sort.clone(), num_comparisons(n))),
                        ctx.peers.clone(),
                        SORT_TAG,
                    )
                    .invoke_tagged(
                        Box::new(RandomnessPatron::new(self.zip.clone(), pairs)),
                        ctx.peers.clone(),
                        ZIP_TAG,
                    )
                    .invoke_tagged(
                        Box::new(RandomnessPatron::new(self.factory.randomness_info(), pairs)),
                        ctx.peers.clone(),
                        REDUCE_TAG,
                    );
                self.state = State::AwaitingRandomness;
                Ok(actions)
            }
            (State::AwaitingRandomness, Event::Complete(completion)) => {
                match completion.tag {
                    SORT_TAG => {
                        let d = completion.output::<Dispenser<SortSwapRandomness>>()?;
                        self.sort_randomness = Some(d.into_vec());
                    }
                    ZIP_TAG => {
                        let d = completion.output::<Dispenser<ZipAdjacentRandomness>>()?;
                        self.zip_randomness = Some(d.into_vec());
                    }
                    _ => {
                        let d = completion.output::<Dispenser<FactoryInstance<F>>>()?;
                        self.reduce_randomness = Some(d.into_vec());
                    }
                }
                if !self.has_randomness() {
                    return Ok(Actions::none());
                }
                debug!(rows = self.list.len(), "join randomness ready");
                let randomness = self.sort_randomness.take().unwrap_or_default();
                self.state = State::AwaitingSort;
                Ok(Actions::invoked(
                    SisoSort::new(&self.sort, std::mem::take(&mut self.list), randomness),
                    Self::compute_peers(ctx),
                ))
            }
            (State::AwaitingSort, Event::Complete(completion)) => {
                let sorted = completion.output::<ObservationList>()?;
                let randomness = self.zip_randomness.take().unwrap_or_default();
                self.state = State::AwaitingZipAdjacent;
                Ok(Actions::invoked(
                    ZipAdjacent::new(&self.zip, sorted, randomness),
                    Self::compute_peers(ctx),
                ))
            }
            (State::AwaitingZipAdjacent, Event::Complete(completion)) => {
                let pairs = completion.output::<Vec<RowPair>>()?;
                let randomness = self.reduce_randomness.take().unwrap_or_default();
                self.state = State::AwaitingZipReduce;
                Ok(Actions::invoked(
                    ZipReduce::new(self.factory.clone(), pairs, randomness),
                    Self::compute_peers(ctx),
                ))
            }
            (State::AwaitingZipReduce, Event::Complete(completion)) => {
                let rows = completion.output::<Vec<Vec<BigUint>>>()?;
                let sums = column_sums(&rows, self.factory.output_len(), &self.zip.payload_modulus);
                Ok(Actions::completed(sums))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

/// Dealer side of [`PrivateJoin`].
pub struct PrivateJoinHouse<I: RandomnessInfo> {
    sort: SisoSortInfo,
    zip: ZipAdjacentInfo,
    reduce: I,
    remaining: usize,
}

impl<I: RandomnessInfo> PrivateJoinHouse<I> {
    pub fn new(sort: SisoSortInfo, zip: ZipAdjacentInfo, reduce: I) -> Self {
        Self {
            sort,
            zip,
            reduce,
            remaining: 3,
        }
    }
}

impl<I: RandomnessInfo> Fronctocol for PrivateJoinHouse<I> {
    fn name(&self) -> &'static str {
        "PrivateJoinHouse"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match event {
            Event::Init => {
                let mut actions = Actions::none();
                actions
                    .invoke_tagged(
                        Box::new(RandomnessHouse::new(self.sort.clone())),
                        ctx.peers.clone(),
                        SORT_TAG,
                    )
                    .invoke_tagged(
                        Box::new(RandomnessHouse::new(self.zip.clone())),
                        ctx.peers.clone(),
                        ZIP_TAG,
                    )
                    .invoke_tagged(
                        Box::new(RandomnessHouse::new(self.reduce.clone())),
                        ctx.peers.clone(),
                        REDUCE_TAG,
                    );
                Ok(actions)
            }
            Event::Complete(_) if self.remaining > 0 => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    Ok(Actions::completed(()))
                } else {
                    Ok(Actions::none())
                }
            }
            event => Err(ProtocolError::unexpected(self.name(), self.remaining, &event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        arith::prime_above_pow2,
        fronctocol::InstanceId,
        identity::{Identity, PeerSet},
        observation::Observation,
        protocols::{compare::CompareInfo, zip::testing::CrossProducts},
        randomness::testing::open_additive,
        simulation::Simulation,
    };

    /// Own rows as values, the other party's rows as zeros, lower vertical first.
    fn pair_input(
        own: &[(u32, u32, u32)],
        other_len: usize,
        own_first: bool,
    ) -> ObservationList {
        let mut list = ObservationList::new(2, 2, 0);
        if !own_first {
            list.pad_zeros(other_len);
        }
        for &(key, tie, value) in own {
            let keys = vec![BigUint::from(key), BigUint::from(tie)];
            list.push(Observation::new(
                keys,
                vec![BigUint::from(1u32), BigUint::from(value)],
                vec![],
            ))
                .unwrap();
        }
        if own_first {
            list.pad_zeros(other_len);
        }
        list
    }

    #[test]
    fn test_private_join() {
        let pk = prime_above_pow2(16);
        let pp = prime_above_pow2(40);
        let base = BigUint::from(2u32);
        let sort = SisoSortInfo::new(&pk, &pp, base.clone(), 2, 2).unwrap();
        let zip = ZipAdjacentInfo {
            compare: CompareInfo::new(&pk).unwrap(),
            payload_modulus: pp.clone(),
            key_base: base,
            match_keys: 1,
            num_arithmetic: 2,
        };
        let factory = CrossProducts {
            modulus: pp.clone(),
            pairs: Arc::new(vec![(0, 0), (1, 1)]),
        };

        let a_rows = [(4, 0, 2), (7, 0, 3), (1, 0, 5), (9, 0, 7)];
        let b_rows = [(7, 1, 10), (2, 1, 20), (4, 1, 30)];
        let a = Identity::data_owner(1, 0);
        let b = Identity::data_owner(2, 1);
        let dealer = Identity::dealer(3);
        let peers: PeerSet = [a, b, dealer].into_iter().collect();
        let id = InstanceId::root("join");

        let mut sim = Simulation::new();
        sim.start(
            dealer,
            id,
            Box::new(PrivateJoinHouse::new(sort.clone(), zip.clone(), factory.randomness_info())),
            peers.clone(),
        )
        .unwrap();
        let a_list = pair_input(&a_rows, b_rows.len(), true);
        let b_list = pair_input(&b_rows, a_rows.len(), false);
        for (party, list) in [(a, a_list), (b, b_list)] {
            let join = PrivateJoin::new(sort.clone(), zip.clone(), factory.clone(), list);
            sim.start(party, id, Box::new(join), peers.clone()).unwrap();
        }
        sim.run().unwrap();

        let sums: Vec<Vec<BigUint>> = [a, b]
            .iter()
            .map(|party| sim.output::<Vec<BigUint>>(party, &id).unwrap())
            .collect();
        // keys 4 and 7 match: count 2, Σ a·b = 2·30 + 3·10
        assert_eq!(open_additive(&sums, &pp), vec![BigUint::from(2u32), BigUint::from(90u32)]);
        assert!(sim.is_finished(&dealer, &id));
    }
}
