//! Oblivious lookup of a cell in a public table.
//!
//! Every data owner holds the same table. The shared location is masked with a
//! random offset `r`, the masked index is opened, and the cell is picked out by a
//! one-hot XOR-shared vector rotated by `r`. The output is XOR shared.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rand::Rng;

use crate::{
    arith::{mod_add, mod_mul, mod_sub},
    fronctocol::{Actions, Context, Event, Fronctocol, ProtocolError},
    randomness::{additive_shares, xor_share_vec, RandomnessInfo},
    wire::{MessageReader, MessageWriter, WireError},
};

use super::{
    compare::{Compare, CompareInfo, CompareRandomness},
    reveal::Reveal,
    typecast::{DaBit, TypeCastFromBit},
};

/// Public table of fixed-width cells, stored row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupTable {
    cell_bytes: usize,
    num_cols: usize,
    cells: Vec<Vec<u8>>,
}

impl LookupTable {
    pub fn new(
        cell_bytes: usize,
        num_cols: usize,
        cells: Vec<Vec<u8>>,
    ) -> Result<Self, ProtocolError> {
        if num_cols == 0 || cells.is_empty() || cells.len() % num_cols != 0 {
            return Err(ProtocolError::Invalid(format!(
                "{} cells do not fill rows of {} columns",
                cells.len(),
                num_cols
            )));
        }
        if let Some(bad) = cells.iter().find(|c| c.len() != cell_bytes) {
            return Err(ProtocolError::Invalid(format!(
                "cell of {} bytes in a table of {}-byte cells",
                bad.len(),
                cell_bytes
            )));
        }
        Ok(Self {
            cell_bytes,
            num_cols,
            cells,
        })
    }

    pub fn cell_bytes(&self) -> usize {
        self.cell_bytes
    }

    pub fn num_rows(&self) -> usize {
        self.cells.len() / self.num_cols
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> &[u8] {
        &self.cells[index]
    }

    pub fn at(&self, row: usize, col: usize) -> &[u8] {
        &self.cells[row * self.num_cols + col]
    }
}

#[derive(Clone, Debug)]
pub struct LookupInfo {
    pub compare: CompareInfo,
    pub table_size: usize,
}

impl LookupInfo {
    pub fn new(compare: CompareInfo, table_size: usize) -> Self {
        Self { compare, table_size }
    }

    pub fn modulus(&self) -> &BigUint {
        &self.compare.modulus
    }
}

/// One party's randomness for one lookup.
#[derive(Clone, Debug)]
pub struct LookupRandomness {
    /// share of the offset, uniform in `[0, table_size)`
    pub offset: BigUint,
    /// XOR share of the one-hot vector selecting position `offset`
    pub selector: Vec<bool>,
    pub compare: CompareRandomness,
    pub dabit: DaBit,
}

impl RandomnessInfo for LookupInfo {
    type Instance = LookupRandomness;

    fn name(&self) -> &'static str {
        "Lookup"
    }

    fn generate<R: Rng + ?Sized>(&self, parties: usize, rng: &mut R) -> Vec<LookupRandomness> {
        let p = self.modulus();
        let offset = rng.gen_range(0..self.table_size);
        let offsets = additive_shares(rng, &BigUint::from(offset), parties, p);
        let one_hot: Vec<bool> = (0..self.table_size).map(|i| i == offset).collect();
        let selectors = xor_share_vec(rng, &one_hot, parties);
        let compare = self.compare.generate(parties, rng);
        let dabits = DaBit::generate(p, parties, rng);
        itertools::izip!(offsets, selectors, compare, dabits)
            .map(|(offset, selector, compare, dabit)| LookupRandomness {
                offset,
                selector,
                compare,
                dabit,
            })
            .collect()
    }

    fn write_instance(&self, w: &mut MessageWriter, instance: &LookupRandomness) {
        let p = self.modulus();
        w.write_elem(&instance.offset, p);
        for &bit in &instance.selector {
            w.write_bool(bit);
        }
        self.compare.write_instance(w, &instance.compare);
        instance.dabit.write(w, p);
    }

    fn read_instance(&self, r: &mut MessageReader<'_>) -> Result<LookupRandomness, WireError> {
        let p = self.modulus();
        let offset = r.read_elem(p)?;
        let selector = (0..self.table_size)
            .map(|_| r.read_bool())
            .collect::<Result<_, _>>()?;
        Ok(LookupRandomness {
            offset,
            selector,
            compare: self.compare.read_instance(r)?,
            dabit: DaBit::read(r, p)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    AwaitingCompare,
    AwaitingTypeCastFromBit,
    AwaitingReveal,
}

/// XOR shares of `table[location]` for shared locations in `[0, table.len())`.
/// Completes with `Vec<Vec<u8>>`.
pub struct Lookup {
    info: LookupInfo,
    table: Arc<LookupTable>,
    masked: Vec<BigUint>,
    randomness: Vec<LookupRandomness>,
    state: State,
}

impl Lookup {
    pub fn new(
        info: &LookupInfo,
        table: Arc<LookupTable>,
        locations: Vec<BigUint>,
        randomness: Vec<LookupRandomness>,
    ) -> Self {
        assert_eq!(locations.len(), randomness.len(), "one randomness bundle per lookup");
        assert_eq!(table.len(), info.table_size, "table does not match lookup randomness");
        let p = info.modulus();
        let masked = locations
            .iter()
            .zip(&randomness)
            .map(|(loc, rand)| mod_sub(loc, &rand.offset, p))
            .collect();
        Self {
            info: info.clone(),
            table,
            masked,
            randomness,
            state: State::Init,
        }
    }

    fn select(&self, index: usize, selector: &[bool]) -> Vec<u8> {
        let size = self.table.len();
        let mut out = vec![0u8; self.table.cell_bytes()];
        for (i, &on) in selector.iter().enumerate() {
            if !on {
                continue;
            }
            for (acc, byte) in out.iter_mut().zip(self.table.cell((index + i) % size)) {
                *acc ^= byte;
            }
        }
        out
    }
}

impl Fronctocol for Lookup {
    fn name(&self) -> &'static str {
        "Lookup"
    }

    fn step(&mut self, ctx: &Context<'_>, event: Event) -> Result<Actions, ProtocolError> {
        let p = self.info.modulus().clone();
        match (self.state, event) {
            (State::Init, Event::Init) if self.masked.is_empty() => {
                Ok(Actions::completed(Vec::<Vec<u8>>::new()))
            }
            (State::Init, Event::Init) => {
                let compare = self.randomness.iter().map(|r| r.compare.clone()).collect();
                self.state = State::AwaitingCompare;
                Ok(Actions::invoked(
                    Compare::is_negative(&self.info.compare, self.masked.clone(), compare),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingCompare, Event::Complete(completion)) => {
                let wrapped = completion.output::<Vec<bool>>()?;
                let dabits = self.randomness.iter().map(|r| r.dabit.clone()).collect();
                self.state = State::AwaitingTypeCastFromBit;
                Ok(Actions::invoked(
                    TypeCastFromBit::new(&p, wrapped, dabits),
                    ctx.peers.clone(),
                ))
            }
            (State::AwaitingTypeCastFromBit, Event::Complete(completion)) => {
                let wrapped = completion.output::<Vec<BigUint>>()?;
                let size = BigUint::from(self.info.table_size);
                let index = self
                    .masked
                    .iter()
                    .zip(&wrapped)
                    .map(|(z, w)| mod_add(z, &mod_mul(w, &size, &p), &p))
                    .collect();
                self.state = State::AwaitingReveal;
                Ok(Actions::invoked(Reveal::additive(&p, index), ctx.peers.clone()))
            }
            (State::AwaitingReveal, Event::Complete(completion)) => {
                let opened = completion.output::<Vec<BigUint>>()?;
                let cells = opened
                    .iter()
                    .zip(&self.randomness)
                    .map(|(index, rand)| {
                        let index = index
                            .to_usize()
                            .filter(|&i| i < self.info.table_size)
                            .ok_or_else(|| {
                                ProtocolError::Invalid(format!(
                                    "lookup index {} out of range",
                                    index
                                ))
                            })?;
                        Ok(self.select(index, &rand.selector))
                    })
                    .collect::<Result<Vec<_>, ProtocolError>>()?;
                Ok(Actions::completed(cells))
            }
            (state, event) => Err(ProtocolError::unexpected(self.name(), state, &event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arith::prime_above_pow2, identity::PeerSet, protocols::reveal::testing::*,
        randomness::{additive_share_vec, generate_many},
    };

    fn xor_open(shares: &[Vec<Vec<u8>>]) -> Vec<Vec<u8>> {
        let mut out = shares[0].clone();
        for party in &shares[1..] {
            for (acc, cell) in out.iter_mut().zip(party) {
                for (a, b) in acc.iter_mut().zip(cell) {
                    *a ^= b;
                }
            }
        }
        out
    }

    #[test]
    fn test_table_shape() {
        let table = LookupTable::new(2, 3, (0..6u8).map(|i| vec![i, 0]).collect()).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.at(1, 2), &[5, 0]);
        assert!(LookupTable::new(2, 4, (0..6u8).map(|i| vec![i, 0]).collect()).is_err());
        assert!(LookupTable::new(2, 3, (0..6u8).map(|i| vec![i]).collect()).is_err());
    }

    #[test]
    fn test_lookup() {
        let p = prime_above_pow2(24);
        let cells: Vec<Vec<u8>> = (0..12u8).map(|i| vec![i * 17, 255 - i, i]).collect();
        let table = Arc::new(LookupTable::new(3, 4, cells.clone()).unwrap());
        let info = LookupInfo::new(CompareInfo::new(&p).unwrap(), table.len());
        let locations = [0usize, 5, 11, 7, 7];

        for n in [1, 3] {
            let mut rng = rand::thread_rng();
            let values: Vec<BigUint> = locations.iter().map(|&l| BigUint::from(l)).collect();
            let shares = additive_share_vec(&mut rng, &values, n, &p);
            let randomness = generate_many(&info, locations.len(), n, &mut rng);
            let peers: PeerSet = data_owners(n).into_iter().collect();
            let parties = itertools::izip!(peers.data_owners(), shares, randomness)
                .map(|(id, loc, r)| {
                    let f = Lookup::new(&info, table.clone(), loc, r);
                    (*id, Box::new(f) as Box<dyn Fronctocol>)
                })
                .collect();
            let outputs = in_order(&peers, run_parties::<Vec<Vec<u8>>>(parties, peers.clone()));
            let expected: Vec<Vec<u8>> = locations.iter().map(|&l| cells[l].clone()).collect();
            assert_eq!(xor_open(&outputs), expected);
        }
    }
}
