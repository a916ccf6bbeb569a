//! Inner join of two verticals, run as one private join per pair of data owners.
//!
//! Every data owner of one vertical is paired with every data owner of the other.
//! A pair's list is the concatenation of both owners' padded rows, lower vertical
//! first; each owner shares its own rows in the clear and zeros for the other's.
//! Sort keys are `2·J + tie` with `tie = 1` on the data vertical, so a matching pair
//! sorts other-vertical row first. Summing the pair outputs gives every data owner
//! an additive share, among all data owners, of the column sums.

use mpc::{
    arith::next_prime,
    observation::{Observation, ObservationList},
    protocols::{
        compare::CompareInfo,
        join::{PrivateJoin, PrivateJoinHouse},
        sort::SisoSortInfo,
        zip::{ZipAdjacentInfo, ZipReduceFactory},
    },
    Actions, Context, Event, Fronctocol, Identity, PeerSet, ProtocolError, RandomnessInfo,
};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use tracing::debug;

use crate::global::GlobalInfo;

/// One of a data owner's rows: composite join key and payload residues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinRow {
    pub key: BigUint,
    pub payload: Vec<BigUint>,
}

/// Key and list parameters shared by the pairwise joins of a query.
#[derive(Clone, Debug)]
pub struct JoinInfo {
    pub sort: SisoSortInfo,
    pub zip: ZipAdjacentInfo,
    /// joined verticals, lower first
    pub verticals: (u32, u32),
    /// vertical whose rows sort second within a match
    pub data_vertical: u32,
    pub max_list_size: usize,
    /// real composite keys are below this bound, padding keys below twice it
    pub key_bound: BigUint,
}

impl JoinInfo {
    pub fn new(
        global: &GlobalInfo,
        num_join_keys: usize,
        verticals: (u32, u32),
        data_vertical: u32,
        payload_modulus: &BigUint,
        width: usize,
    ) -> Result<Self, ProtocolError> {
        let key_max = BigUint::from(global.key_max);
        let key_bound = key_max.pow(num_join_keys as u32);
        let key_modulus = next_prime(&((key_max * 2u32).pow(num_join_keys as u32) * 4u32));
        let base = BigUint::from(2u32);
        let compare = CompareInfo::new(&key_modulus)?;
        let sort = SisoSortInfo {
            compare: compare.clone(),
            payload_modulus: payload_modulus.clone(),
            key_base: base.clone(),
            num_keys: 2,
            num_arithmetic: width,
        };
        let zip = ZipAdjacentInfo {
            compare,
            payload_modulus: payload_modulus.clone(),
            key_base: base,
            match_keys: 1,
            num_arithmetic: width,
        };
        Ok(Self {
            sort,
            zip,
            verticals: (verticals.0.min(verticals.1), verticals.0.max(verticals.1)),
            data_vertical,
            max_list_size: global.max_list_size,
            key_bound,
        })
    }

    pub fn key_modulus(&self) -> &BigUint {
        self.sort.key_modulus()
    }

    pub fn payload_modulus(&self) -> &BigUint {
        &self.zip.payload_modulus
    }

    pub fn width(&self) -> usize {
        self.zip.num_arithmetic
    }

    pub fn other_vertical(&self, vertical: u32) -> u32 {
        if vertical == self.verticals.0 {
            self.verticals.1
        } else {
            self.verticals.0
        }
    }

    /// Data owner, dealer and partner of one pairwise join.
    pub fn pair_peers(a: Identity, b: Identity, dealer: Identity) -> PeerSet {
        [a, b, dealer].into_iter().collect()
    }

    /// `me`'s share of the list joined with `other`.
    pub fn pair_list(
        &self,
        me: &Identity,
        rows: &[JoinRow],
    ) -> Result<ObservationList, ProtocolError> {
        if rows.len() > self.max_list_size {
            return Err(ProtocolError::Invalid(format!(
                "{} rows exceed the list size of {}",
                rows.len(),
                self.max_list_size
            )));
        }
        let width = self.width();
        let tie = if me.vertical == self.data_vertical {
            BigUint::one()
        } else {
            BigUint::zero()
        };
        let mut own = ObservationList::new(2, width, 0);
        for row in rows {
            if row.key >= self.key_bound || row.payload.len() != width {
                return Err(ProtocolError::Invalid("join row out of range".to_string()));
            }
            own.push(Observation::new(
                vec![row.key.clone(), tie.clone()],
                row.payload.clone(),
                vec![],
            ))?;
        }
        let mut rng = rand::thread_rng();
        let upper = &self.key_bound * 2u32;
        for _ in rows.len()..self.max_list_size {
            let key = rng.gen_biguint_range(&self.key_bound, &upper);
            own.push(Observation::new(
                vec![key, tie.clone()],
                vec![BigUint::zero(); width],
                vec![],
            ))?;
        }

        let mut list = ObservationList::new(2, width, 0);
        if me.vertical != self.verticals.0 {
            list.pad_zeros(self.max_list_size);
        }
        for row in own.into_rows() {
            list.push(row)?;
        }
        if me.vertical == self.verticals.0 {
            list.pad_zeros(self.max_list_size);
        }
        Ok(list)
    }
}

/// Data-owner side: joins this party's rows with every owner of the other vertical.
///
/// Runs with the data owners of both verticals and the dealer. Completes with this
/// party's shares of the column sums of the reduced rows.
pub struct PairwiseJoin<F: ZipReduceFactory> {
    info: JoinInfo,
    factory: F,
    rows: Vec<JoinRow>,
    sums: Vec<BigUint>,
    remaining: usize,
    started: bool,
}

impl<F: ZipReduceFactory> PairwiseJoin<F> {
    pub fn new(info: JoinInfo, factory: F, rows: Vec<JoinRow>) -> Self {
        let width = factory.output_len();
        Self {
            info,
            factory,
            rows,
            sums: vec![BigUint::zero(); width],
            remaining: 0,
            started: false,
        }
    }
}

impl<F: ZipReduceFactory> Fronctocol for PairwiseJoin<F> {
    fn name(&self) -> &'static str {
        "PairwiseJoin"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match event {
            Event::Init if !self.started => {
                self.started = true;
                let dealer = ctx.dealer()?;
                let partners = ctx
                    .peers
                    .vertical(self.info.other_vertical(ctx.me.vertical))
                    .to_vec();
                if partners.is_empty() {
                    return Err(ProtocolError::missing(ctx.peers, "join partner"));
                }
                let list = self.info.pair_list(ctx.me, &self.rows)?;
                debug!(
                    rows = self.rows.len(),
                    partners = partners.len(),
                    "starting pairwise joins"
                );
                let mut actions = Actions::none();
                for partner in partners {
                    let join = PrivateJoin::new(
                        self.info.sort.clone(),
                        self.info.zip.clone(),
                        self.factory.clone(),
                        list.clone(),
                    );
                    actions.invoke(join, JoinInfo::pair_peers(*ctx.me, partner, dealer));
                    self.remaining += 1;
                }
                Ok(actions)
            }
            Event::Complete(completion) if self.remaining > 0 => {
                let p = self.info.payload_modulus().clone();
                let sums = completion.output::<Vec<BigUint>>()?;
                for (acc, x) in self.sums.iter_mut().zip(&sums) {
                    *acc = (&*acc + x) % &p;
                }
                self.remaining -= 1;
                if self.remaining == 0 {
                    Ok(Actions::completed(std::mem::take(&mut self.sums)))
                } else {
                    Ok(Actions::none())
                }
            }
            event => Err(ProtocolError::unexpected(self.name(), self.remaining, &event)),
        }
    }
}

/// Dealer side of [`PairwiseJoin`]: serves the randomness of every pair.
pub struct PairwiseJoinHouse<I: RandomnessInfo> {
    info: JoinInfo,
    reduce: I,
    remaining: usize,
}

impl<I: RandomnessInfo> PairwiseJoinHouse<I> {
    pub fn new(info: JoinInfo, reduce: I) -> Self {
        Self {
            info,
            reduce,
            remaining: 0,
        }
    }
}

impl<I: RandomnessInfo> Fronctocol for PairwiseJoinHouse<I> {
    fn name(&self) -> &'static str {
        "PairwiseJoinHouse"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match event {
            Event::Init => {
                let (lower, upper) = self.info.verticals;
                let mut actions = Actions::none();
                for a in ctx.peers.vertical(lower) {
                    for b in ctx.peers.vertical(upper) {
                        let house = PrivateJoinHouse::new(
                            self.info.sort.clone(),
                            self.info.zip.clone(),
                            self.reduce.clone(),
                        );
                        actions.invoke(house, JoinInfo::pair_peers(*a, *b, *ctx.me));
                        self.remaining += 1;
                    }
                }
                if self.remaining == 0 {
                    actions.complete(());
                }
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
    use super::*;
    use mpc::arith::prime_above_pow2;

    fn info() -> JoinInfo {
        let mut global = GlobalInfo::new(4, 2);
        global.key_max = 10;
        JoinInfo::new(&global, 2, (3, 1), 3, &prime_above_pow2(30), 2).unwrap()
    }

    #[test]
    fn test_info() {
        let info = info();
        assert_eq!(info.verticals, (1, 3));
        assert_eq!(info.key_bound, BigUint::from(100u32));
        assert!(info.key_modulus() > &BigUint::from(4 * 400u32));
        assert_eq!(info.other_vertical(1), 3);
        assert_eq!(info.other_vertical(3), 1);
    }

    #[test]
    fn test_pair_list_layout() {
        let info = info();
        let rows = vec![JoinRow {
            key: BigUint::from(42u32),
            payload: vec![BigUint::one(), BigUint::from(7u32)],
        }];

        // data vertical sits second and carries tie 1
        let upper = info.pair_list(&Identity::data_owner(5, 3), &rows).unwrap();
        assert_eq!(upper.len(), 8);
        assert!(upper.rows()[..4].iter().all(|r| r == &Observation::zeros(2, 2, 0)));
        assert_eq!(upper.rows()[4].keys, vec![BigUint::from(42u32), BigUint::one()]);
        for pad in &upper.rows()[5..] {
            assert!(pad.keys[0] >= BigUint::from(100u32) && pad.keys[0] < BigUint::from(200u32));
            assert!(pad.arithmetic.iter().all(Zero::is_zero));
        }

        let lower = info.pair_list(&Identity::data_owner(6, 1), &rows).unwrap();
        assert_eq!(lower.rows()[0].keys, vec![BigUint::from(42u32), BigUint::zero()]);
        assert!(lower.rows()[4..].iter().all(|r| r == &Observation::zeros(2, 2, 0)));
    }

    #[test]
    fn test_pair_list_limits() {
        let info = info();
        let row = |key: u32| JoinRow {
            key: BigUint::from(key),
            payload: vec![BigUint::one(), BigUint::one()],
        };
        let me = Identity::data_owner(5, 3);
        assert!(info.pair_list(&me, &[row(1), row(2), row(3), row(4), row(5)]).is_err());
        assert!(info.pair_list(&me, &[row(100)]).is_err());
    }
}
