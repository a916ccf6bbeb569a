//! Pairing of adjacent sorted rows with equal join keys, and per-pair reduction.

use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;

use crate::{
    arith::mod_add,
    fronctocol::{Actions, Context, Event, Fronctocol, Output, ProtocolError},
    observation::ObservationList,
    randomness::{transpose, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    batch::Batch,
    compare::{Compare, CompareInfo, CompareRandomness},
    multiply::{BeaverTriple, Multiply},
    typecast::{DaBit, TypeCastFromBit},
};

/// Two payload rows, the lower-keyed one first.
pub type RowPair = (Vec<BigUint>, Vec<BigUint>);

#[derive(Clone, Debug)]
pub struct ZipAdjacentInfo {
    /// comparisons run modulo the key modulus
    pub compare: CompareInfo,
    pub payload_modulus: BigUint,
    pub key_base: BigUint,
    /// leading key columns that must agree for two rows to match
    pub match_keys: usize,
    pub num_arithmetic: usize,
}

/// One party's randomness for one adjacent pair.
#[derive(Clone, Debug)]
pub struct ZipAdjacentRandomness {
    pub compare: CompareRandomness,
    pub dabit: DaBit,
    pub triples: Vec<BeaverTriple>,
}

impl RandomnessInfo for ZipAdjacentInfo {
    type Instance = ZipAdjacentRandomness;

    fn name(&self) -> &'static str {
        "ZipAdjacent"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<ZipAdjacentRandomness> {
        let pp = &self.payload_modulus;
        let compare = self.compare.generate(parties, rng);
        let dabits = DaBit::generate(pp, parties, rng);
        let triples = transpose(
            (0..2 * self.num_arithmetic)
                .map(|_| BeaverTriple::generate(pp, parties, rng))
                .collect(),
            parties,
        );
        itertools::izip!(compare, dabits, triples)
            .map(|(compare, dabit, triples)| ZipAdjacentRandomness {
                compare,
                dabit,
                triples,
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &ZipAdjacentRandomness) {
        self.compare.write_instance(w, &instance.compare);
        instance.dabit.write(w, &self.payload_modulus);
        for t in &instance.triples {
            t.write(w, &self.payload_modulus);
        }
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<ZipAdjacentRandomness, WireError> {
        Ok(ZipAdjacentRandomness {
            compare: self.compare.read_instance(r)?,
            dabit: DaBit::read(r, &self.payload_modulus)?,
            triples: (0..2 * self.num_arithmetic)
                .map(|_| BeaverTriple::read(r, &self.payload_modulus))
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingCompare,
    AwaitingTypeCast,
    AwaitingMultiply,
}

/// For every adjacent pair of a sorted list, both payload rows multiplied by
/// `[keys match]`, so pairs that do not match become zero.
///
/// Completes with `Vec<RowPair>` of length `len - 1`.
pub struct ZipAdjacent {
    info: ZipAdjacentInfo,
    list: ObservationList,
    randomness: Vec<ZipAdjacentRandomness>,
    state: State,
}

impl ZipAdjacent {
    pub fn new(
        info: &ZipAdjacentInfo,
        list: ObservationList,
        randomness: Vec<ZipAdjacentRandomness>,
    ) -> Self {
        assert_eq!(
            randomness.len(),
            list.len().saturating_sub(1),
            "one randomness bundle per adjacent pair"
        );
        Self {
            info: info.clone(),
            list,
            randomness,
            state: State::Init,
        }
    }
}

impl Fronctocol for ZipAdjacent {
    fn name(&self) -> &'static str {
        "ZipAdjacent"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let pp = self.info.payload_modulus.clone();
        match (self.state, event) {
            (State::Init, Event::Init) if self.list.len() < 2 => {
                Ok(Actions::completed(Vec::<RowPair>::new()))
            }
            (State::Init, Event::Init) => {
                if self.list.num_arithmetic() != self.info.num_arithmetic {
                    return Err(ProtocolError::Invalid(
                        "observation list does not match zip parameters".to_string(),
                    ));
                }
                let pk = &self.info.compare.modulus;
                let keys: Vec<BigUint> = self
                    .list
                    .rows()
                    .iter()
                    .map(|row| row.composite_key(self.info.match_keys, &self.info.key_base, pk))
                    .collect();
                let lower = keys[..keys.len() - 1].to_vec();
                let upper = keys[1..].to_vec();
                let compare = self.randomness.iter().map(|r| r.compare.clone()).collect();
                self.state = State::AwaitingCompare;
                Ok(Actions::invoked(
                    Compare::new(&self.info.compare, lower, upper, compare),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingCompare, Event::Complete(completion)) => {
                // sorted input, so the keys match unless the lower one is smaller
                let revealer = ctx.is_revealer();
                let matches = completion
                    .output::<Vec<bool>>()?
                    .into_iter()
                    .map(|lt| lt ^ revealer)
                    .collect();
                let dabits = self.randomness.iter().map(|r| r.dabit.clone()).collect();
                self.state = State::AwaitingTypeCast;
                Ok(Actions::invoked(
                    TypeCastFromBit::new(&pp, matches, dabits),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingTypeCast, Event::Complete(completion)) => {
                let matches = completion.output::<Vec<BigUint>>()?;
                let rows = self.list.rows();
                let mut xs = Vec::new();
                let mut ys = Vec::new();
                let mut triples = Vec::new();
                for (i, m) in matches.iter().enumerate() {
                    for value in rows[i].arithmetic.iter().chain(&rows[i + 1].arithmetic) {
                        xs.push(m.clone());
                        ys.push(value.clone());
                    }
                    triples.append(&mut self.randomness[i].triples);
                }
                self.state = State::AwaitingMultiply;
                Ok(Actions::invoked(Multiply::new(&pp, xs, ys, triples), ctx.peers.clone()))
            }
            (State::AwaitingMultiply, Event::Complete(completion)) => {
                let gated = completion.output::<Vec<BigUint>>()?;
                let width = self.info.num_arithmetic;
                let pairs: Vec<RowPair> = gated
                    .chunks(2 * width)
                    .map(|chunk| (chunk[..width].to_vec(), chunk[width..].to_vec()))
                    .collect();
                Ok(Actions::completed(pairs))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

/// Per-pair computation applied by [`ZipReduce`].
///
/// `reduce` builds a fronctocol that completes with a `Vec<BigUint>` of
/// `output_len()` shares.
pub trait ZipReduceFactory: Clone + Send + Sync + 'static {
    type Info: RandomnessInfo;

    fn randomness_info(&self) -> Self::Info;

    fn output_len(&self) -> usize;

    fn reduce(
        &self,
        left: Vec<BigUint>,
        right: Vec<BigUint>,
        randomness: <Self::Info as RandomnessInfo>::Instance,
    ) -> Box<dyn Fronctocol>;
}

/// Applies a [`ZipReduceFactory`] to every pair concurrently.
/// Completes with one reduced row per pair, `Vec<Vec<BigUint>>`.
pub struct ZipReduce<F: ZipReduceFactory> {
    factory: F,
    pairs: Vec<RowPair>,
    randomness: Vec<<F::Info as RandomnessInfo>::Instance>,
    started: bool,
}

impl<F: ZipReduceFactory> ZipReduce<F> {
    pub fn new(
        factory: F,
        pairs: Vec<RowPair>,
        randomness: Vec<<F::Info as RandomnessInfo>::Instance>,
    ) -> Self {
        assert_eq!(pairs.len(), randomness.len(), "one randomness instance per pair");
        Self {
            factory,
            pairs,
            randomness,
            started: false,
        }
    }
}

impl<F: ZipReduceFactory> Fronctocol for ZipReduce<F> {
    fn name(&self) -> &'static str {
        "ZipReduce"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match event {
            Event::Init if !self.started => {
                self.started = true;
                let children = self
                    .pairs
                    .drain(..)
                    .zip(self.randomness.drain(..))
                    .map(|((left, right), randomness)| self.factory.reduce(left, right, randomness))
                    .collect();
                Ok(Actions::invoked(Batch::new(children), ctx.peers.clone()))
            }
            Event::Complete(completion) if self.started => {
                let rows = Batch::outputs_as::<Vec<BigUint>>(completion.output::<Vec<Output>>()?)?;
                if let Some(bad) = rows.iter().find(|r| r.len() != self.factory.output_len()) {
                    return Err(ProtocolError::Invalid(format!(
                        "reduced row has {} entries instead of {}",
                        bad.len(),
                        self.factory.output_len()
                    )));
                }
                Ok(Actions::completed(rows))
            }
            event => Err(ProtocolError::unexpected(self.name(), self.started, &event)),
        }
    }
}

/// Column-wise sum of reduced rows.
pub fn column_sums(rows: &[Vec<BigUint>], width: usize, p: &BigUint) -> Vec<BigUint> {
    let mut sums = vec![BigUint::zero(); width];
    for row in rows {
        for (acc, x) in sums.iter_mut().zip(row) {
            *acc = mod_add(acc, x, p);
        }
    }
    sums
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{testing::CrossProducts, *};
    use crate::{
        arith::prime_above_pow2,
        identity::PeerSet,
        observation::Observation,
        protocols::reveal::testing::*,
        randomness::{additive_share_vec, generate_many, testing::open_additive},
    };

    #[test]
    fn test_zip_adjacent_and_reduce() {
        let pk = prime_above_pow2(20);
        let pp = prime_above_pow2(40);
        let info = ZipAdjacentInfo {
            compare: CompareInfo::new(&pk).unwrap(),
            payload_modulus: pp.clone(),
            key_base: BigUint::from(2u32),
            match_keys: 1,
            num_arithmetic: 2,
        };
        // sorted (key, tie, [present, value]); keys 3 and 8 appear on both sides
        let rows: [(u32, u32, [u32; 2]); 6] = [
            (1, 1, [1, 10]),
            (3, 0, [1, 4]),
            (3, 1, [1, 30]),
            (5, 0, [1, 6]),
            (8, 0, [1, 2]),
            (8, 1, [1, 80]),
        ];
        let n = 2;
        let mut rng = rand::thread_rng();
        let mut lists: Vec<ObservationList> = (0..n)
            .map(|_| ObservationList::new(2, 2, 0))
            .collect();
        for &(key, tie, payload) in &rows {
            let keys = additive_share_vec(
                &mut rng,
                &[BigUint::from(key), BigUint::from(tie)],
                n,
                &pk,
            );
            let values: Vec<BigUint> = payload.iter().map(|&v| BigUint::from(v)).collect();
            let payload = additive_share_vec(&mut rng, &values, n, &pp);
            for ((list, k), a) in lists.iter_mut().zip(keys).zip(payload) {
                list.push(Observation::new(k, a, vec![])).unwrap();
            }
        }
        let zip_randomness = generate_many(&info, rows.len() - 1, n, &mut rng);
        let peers: PeerSet = data_owners(n).into_iter().collect();
        let parties = itertools::izip!(peers.data_owners(), lists, zip_randomness)
            .map(|(id, list, r)| {
                (*id, Box::new(ZipAdjacent::new(&info, list, r)) as Box<dyn Fronctocol>)
            })
            .collect();
        let pairs = in_order(&peers, run_parties::<Vec<RowPair>>(parties, peers.clone()));
        assert!(pairs.iter().all(|p| p.len() == rows.len() - 1));

        // count of matches and sum of left·right values
        let factory = CrossProducts {
            modulus: pp.clone(),
            pairs: Arc::new(vec![(0, 0), (1, 1)]),
        };
        let reduce_randomness = generate_many(
            &factory.randomness_info(),
            rows.len() - 1,
            n,
            &mut rng,
        );
        let parties = itertools::izip!(peers.data_owners(), pairs, reduce_randomness)
            .map(|(id, pairs, r)| {
                (*id, Box::new(ZipReduce::new(factory.clone(), pairs, r)) as Box<dyn Fronctocol>)
            })
            .collect();
        let reduced = in_order(&peers, run_parties::<Vec<Vec<BigUint>>>(parties, peers.clone()));
        let sums: Vec<Vec<BigUint>> = reduced
            .iter()
            .map(|rows| column_sums(rows, 2, &pp))
            .collect();
        assert_eq!(
            open_additive(&sums, &pp),
            vec![BigUint::from(2u32), BigUint::from(4u32 * 30 + 2 * 80)]
        );
    }
}
