//! Oblivious sorting of a shared observation list.
//!
//! Rows are sorted with a fixed comparison network, one layer at a time: every
//! comparison of a layer runs in the same round, and a pair is swapped by
//! `i' = i + s·(j - i)`, `j' = j - s·(j - i)` with `s = [key_j < key_i]`.

use std::cmp;

use num_bigint::BigUint;
use rand::Rng;

use crate::{
    arith::{mod_add, mod_sub},
    fronctocol::{Actions, Context, Event, Fronctocol, Output, ProtocolError},
    observation::ObservationList,
    randomness::RandomnessInfo,
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    batch::Batch,
    compare::{Compare, CompareInfo, CompareRandomness},
    multiply::{BeaverTriple, Multiply},
    typecast::{DaBit, TypeCastFromBit},
};

/// Compare-exchange pairs of the sorting network for `n` elements, layer by layer.
pub fn sort_layers(n: usize) -> Vec<Vec<(usize, usize)>> {
    let mut layers = Vec::new();
    let mut segment = 1;

    while segment < n {
        let mut step = segment;

        while step >= 1 {
            let mut layer = Vec::new();

            for j in (step % segment..n - step).step_by(step * 2) {
                for i in 0..cmp::min(step, n - j - step) {
                    if (i + j) / (segment * 2) == (i + j + step) / (segment * 2) {
                        layer.push((i + j, i + j + step));
                    }
                }
            }

            if !layer.is_empty() {
                layers.push(layer);
            }
            step /= 2;
        }

        segment *= 2;
    }
    layers
}

pub fn num_comparisons(n: usize) -> usize {
    sort_layers(n).iter().map(Vec::len).sum()
}

#[derive(Clone, Debug)]
pub struct SisoSortInfo {
    /// comparisons run modulo the key modulus
    pub compare: CompareInfo,
    pub payload_modulus: BigUint,
    pub key_base: BigUint,
    pub num_keys: usize,
    pub num_arithmetic: usize,
}

impl SisoSortInfo {
    pub fn new(
        key_modulus: &BigUint,
        payload_modulus: &BigUint,
        key_base: BigUint,
        num_keys: usize,
        num_arithmetic: usize,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            compare: CompareInfo::new(key_modulus)?,
            payload_modulus: payload_modulus.clone(),
            key_base,
            num_keys,
            num_arithmetic,
        })
    }

    pub fn key_modulus(&self) -> &BigUint {
        &self.compare.modulus
    }
}

/// One party's randomness for one compare-exchange.
#[derive(Clone, Debug)]
pub struct SortSwapRandomness {
    pub compare: CompareRandomness,
    pub key_dabit: DaBit,
    pub payload_dabit: DaBit,
    pub key_triples: Vec<BeaverTriple>,
    pub payload_triples: Vec<BeaverTriple>,
}

impl RandomnessInfo for SisoSortInfo {
    type Instance = SortSwapRandomness;

    fn name(&self) -> &'static str {
        "SisoSort"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<SortSwapRandomness> {
        let (pk, pp) = (self.key_modulus(), &self.payload_modulus);
        let compare = self.compare.generate(parties, rng);
        let key_dabits = DaBit::generate(pk, parties, rng);
        let payload_dabits = DaBit::generate(pp, parties, rng);
        let key_triples = crate::randomness::transpose(
            (0..self.num_keys)
                .map(|_| BeaverTriple::generate(pk, parties, rng))
                .collect(),
            parties,
        );
        let payload_triples = crate::randomness::transpose(
            (0..self.num_arithmetic)
                .map(|_| BeaverTriple::generate(pp, parties, rng))
                .collect(),
            parties,
        );
        itertools::izip!(compare, key_dabits, payload_dabits, key_triples, payload_triples)
            .map(|(compare, key_dabit, payload_dabit, key_triples, payload_triples)| {
                SortSwapRandomness {
                    compare,
                    key_dabit,
                    payload_dabit,
                    key_triples,
                    payload_triples,
                }
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &SortSwapRandomness) {
        let (pk, pp) = (self.key_modulus(), &self.payload_modulus);
        self.compare.write_instance(w, &instance.compare);
        instance.key_dabit.write(w, pk);
        instance.payload_dabit.write(w, pp);
        for t in &instance.key_triples {
            t.write(w, pk);
        }
        for t in &instance.payload_triples {
            t.write(w, pp);
        }
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<SortSwapRandomness, WireError> {
        let (pk, pp) = (self.key_modulus(), &self.payload_modulus);
        Ok(SortSwapRandomness {
            compare: self.compare.read_instance(r)?,
            key_dabit: DaBit::read(r, pk)?,
            payload_dabit: DaBit::read(r, pp)?,
            key_triples: (0..self.num_keys)
                .map(|_| BeaverTriple::read(r, pk))
                .collect::<Result<_, _>>()?,
            payload_triples: (0..self.num_arithmetic)
                .map(|_| BeaverTriple::read(r, pp))
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingCompare,
    AwaitingTypeCast,
    AwaitingSwap,
}

/// Shared-input shared-output sort of an observation list by its composite key.
///
/// Randomness is consumed layer by layer, one bundle per compare-exchange, in
/// [`sort_layers`] order. Lists with XOR payload are rejected. Completes with the
/// sorted `ObservationList`.
pub struct SisoSort {
    info: SisoSortInfo,
    list: ObservationList,
    layers: Vec<Vec<(usize, usize)>>,
    layer: usize,
    randomness: Vec<SortSwapRandomness>,
    state: State,
}

impl SisoSort {
    pub fn new(
        info: &SisoSortInfo,
        list: ObservationList,
        randomness: Vec<SortSwapRandomness>,
    ) -> Self {
        let layers = sort_layers(list.len());
        assert_eq!(
            randomness.len(),
            layers.iter().map(Vec::len).sum::<usize>(),
            "one randomness bundle per compare-exchange"
        );
        Self {
            info: info.clone(),
            list,
            layers,
            layer: 0,
            randomness,
            state: State::Init,
        }
    }

    fn current(&self) -> &[(usize, usize)] {
        &self.layers[self.layer]
    }

    /// Randomness of the current layer; earlier layers have already been drained.
    fn layer_randomness(&self) -> &[SortSwapRandomness] {
        &self.randomness[..self.current().len()]
    }

    fn start_layer(&mut self, ctx: &Context<'_>) -> Actions {
        let (base, pk) = (&self.info.key_base, self.info.key_modulus());
        let rows = self.list.rows();
        let (lower, upper): (Vec<BigUint>, Vec<BigUint>) = self
            .current()
            .iter()
            .map(|&(i, j)| {
                (
                    rows[i].composite_key(self.info.num_keys, base, pk),
                    rows[j].composite_key(self.info.num_keys, base, pk),
                )
            })
            .unzip();
        let compare = self.layer_randomness().iter().map(|r| r.compare.clone()).collect();
        self.state = State::AwaitingCompare;
        Actions::invoked(
            Compare::new(&self.info.compare, upper, lower, compare),
            ctx.peers.clone(),
        )
    }

    /// `(s, j - i)` operand pairs for every column of every exchange of the layer.
    fn swap_operands(
        &self,
        s: &[BigUint],
        keys: bool,
    ) -> (Vec<BigUint>, Vec<BigUint>, Vec<BeaverTriple>) {
        let p = if keys { self.info.key_modulus() } else { &self.info.payload_modulus };
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        let mut triples = Vec::new();
        for ((&(i, j), bit), rand) in self.current().iter().zip(s).zip(self.layer_randomness()) {
            let (ri, rj) = (&self.list.rows()[i], &self.list.rows()[j]);
            let (ci, cj, ts) = if keys {
                (&ri.keys, &rj.keys, &rand.key_triples)
            } else {
                (&ri.arithmetic, &rj.arithmetic, &rand.payload_triples)
            };
            for (a, b) in ci.iter().zip(cj) {
                xs.push(bit.clone());
                ys.push(mod_sub(b, a, p));
            }
            triples.extend(ts.iter().cloned());
        }
        (xs, ys, triples)
    }

    fn apply_swaps(&mut self, key_deltas: &[BigUint], payload_deltas: &[BigUint]) {
        let pk = self.info.key_modulus().clone();
        let pp = self.info.payload_modulus.clone();
        let (nk, na) = (self.info.num_keys, self.info.num_arithmetic);
        let pairs = self.current().to_vec();
        let rows = self.list.rows_mut();
        for (e, (i, j)) in pairs.into_iter().enumerate() {
            for c in 0..nk {
                let delta = &key_deltas[e * nk + c];
                rows[i].keys[c] = mod_add(&rows[i].keys[c], delta, &pk);
                rows[j].keys[c] = mod_sub(&rows[j].keys[c], delta, &pk);
            }
            for c in 0..na {
                let delta = &payload_deltas[e * na + c];
                rows[i].arithmetic[c] = mod_add(&rows[i].arithmetic[c], delta, &pp);
                rows[j].arithmetic[c] = mod_sub(&rows[j].arithmetic[c], delta, &pp);
            }
        }
    }
}

impl Fronctocol for SisoSort {
    fn name(&self) -> &'static str {
        "SisoSort"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        match (self.state, event) {
            (State::Init, Event::Init) => {
                if self.list.num_xor() > 0 {
                    return Err(ProtocolError::Invalid(
                        "cannot sort XOR payload columns".to_string(),
                    ));
                }
                if self.list.num_keys() != self.info.num_keys
                    || self.list.num_arithmetic() != self.info.num_arithmetic
                {
                    return Err(ProtocolError::Invalid(
                        "observation list does not match sort parameters".to_string(),
                    ));
                }
                if self.layers.is_empty() {
                    return Ok(Actions::completed(std::mem::take(&mut self.list)));
                }
                Ok(self.start_layer(ctx))
            }
            (State::AwaitingCompare, Event::Complete(completion)) => {
                let swap = completion.output::<Vec<bool>>()?;
                let key_dabits = self
                    .layer_randomness()
                    .iter()
                    .map(|r| r.key_dabit.clone())
                    .collect();
                let payload_dabits = self
                    .layer_randomness()
                    .iter()
                    .map(|r| r.payload_dabit.clone())
                    .collect();
                self.state = State::AwaitingTypeCast;
                Ok(Actions::invoked(
                    Batch::new(vec![
                        Box::new(TypeCastFromBit::new(
                            self.info.key_modulus(),
                            swap.clone(),
                            key_dabits,
                        )),
                        Box::new(TypeCastFromBit::new(
                            &self.info.payload_modulus,
                            swap,
                            payload_dabits,
                        )),
                    ]),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingTypeCast, Event::Complete(completion)) => {
                let outputs = completion.output::<Vec<Output>>()?;
                let mut casts = Batch::outputs_as::<Vec<BigUint>>(outputs)?;
                let payload_s = casts.pop().unwrap_or_default();
                let key_s = casts.pop().unwrap_or_default();
                let (kx, ky, kt) = self.swap_operands(&key_s, true);
                let (px, py, pt) = self.swap_operands(&payload_s, false);
                self.state = State::AwaitingSwap;
                Ok(Actions::invoked(
                    Batch::new(vec![
                        Box::new(Multiply::new(self.info.key_modulus(), kx, ky, kt)),
                        Box::new(Multiply::new(&self.info.payload_modulus, px, py, pt)),
                    ]),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingSwap, Event::Complete(completion)) => {
                let outputs = completion.output::<Vec<Output>>()?;
                let mut deltas = Batch::outputs_as::<Vec<BigUint>>(outputs)?;
                let payload_deltas = deltas.pop().unwrap_or_default();
                let key_deltas = deltas.pop().unwrap_or_default();
                self.apply_swaps(&key_deltas, &payload_deltas);
                let used = self.current().len();
                self.randomness.drain(..used);
                self.layer += 1;
                if self.layer == self.layers.len() {
                    Ok(Actions::completed(std::mem::take(&mut self.list)))
                } else {
                    Ok(self.start_layer(ctx))
                }
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

/// Folded key of every row, for callers that need to check sortedness.
pub fn composite_keys(list: &ObservationList, info: &SisoSortInfo) -> Vec<BigUint> {
    list.rows()
        .iter()
        .map(|row| row.composite_key(info.num_keys, &info.key_base, info.key_modulus()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arith::prime_above_pow2,
        identity::PeerSet,
        observation::Observation,
        protocols::reveal::testing::*,
        randomness::{additive_share_vec, generate_many, testing::open_additive},
    };

    #[test]
    fn test_layers_sort_plaintext() {
        for n in 0..20 {
            let mut values: Vec<u32> = (0..n as u32).map(|x| (x * 7919 + 13) % 31).collect();
            for layer in sort_layers(n) {
                for (i, j) in layer {
                    if values[j] < values[i] {
                        values.swap(i, j);
                    }
                }
            }
            assert!(values.windows(2).all(|w| w[0] <= w[1]), "n = {}", n);
        }
    }

    #[test]
    fn test_siso_sort() {
        let pk = prime_above_pow2(20);
        let pp = prime_above_pow2(40);
        let info = SisoSortInfo::new(&pk, &pp, BigUint::from(2u32), 2, 2).unwrap();
        // (join key, tie, payload)
        let rows: [(u32, u32, u32); 9] = [
            (9, 0, 90),
            (3, 1, 31),
            (5, 0, 50),
            (3, 0, 30),
            (11, 1, 111),
            (0, 0, 1),
            (5, 1, 51),
            (7, 1, 71),
            (2, 0, 20),
        ];
        let n = 2;
        let mut rng = rand::thread_rng();
        let mut shares: Vec<ObservationList> = (0..n)
            .map(|_| ObservationList::new(2, 2, 0))
            .collect();
        for &(key, tie, value) in &rows {
            let keys = additive_share_vec(
                &mut rng,
                &[BigUint::from(key), BigUint::from(tie)],
                n,
                &pk,
            );
            let payload = additive_share_vec(
                &mut rng,
                &[BigUint::from(value), BigUint::from(key * 2 + tie)],
                n,
                &pp,
            );
            for ((list, k), a) in shares.iter_mut().zip(keys).zip(payload) {
                list.push(Observation::new(k, a, vec![])).unwrap();
            }
        }
        let randomness = generate_many(&info, num_comparisons(rows.len()), n, &mut rng);

        let peers: PeerSet = data_owners(n).into_iter().collect();
        let parties = itertools::izip!(peers.data_owners(), shares, randomness)
            .map(|(id, list, r)| {
                (*id, Box::new(SisoSort::new(&info, list, r)) as Box<dyn Fronctocol>)
            })
            .collect();
        let sorted = in_order(&peers, run_parties::<ObservationList>(parties, peers.clone()));

        let keys: Vec<Vec<BigUint>> = sorted.iter().map(|l| composite_keys(l, &info)).collect();
        let payload: Vec<Vec<BigUint>> = sorted
            .iter()
            .map(|l| l.rows().iter().map(|r| r.arithmetic[1].clone()).collect())
            .collect();
        let mut expected: Vec<u32> = rows.iter().map(|&(k, t, _)| 2 * k + t).collect();
        expected.sort_unstable();
        let expected: Vec<BigUint> = expected.into_iter().map(BigUint::from).collect();
        assert_eq!(open_additive(&keys, &pk), expected);
        assert_eq!(open_additive(&payload, &pp), expected);
    }
}
