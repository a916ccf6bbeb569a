//! Party identities and the peer sets that scope every protocol instance.

use std::{cmp::Ordering, fmt, hash::Hash};

use serde::{Deserialize, Serialize};

use crate::wire::{MessageReader, MessageWriter, Wire, WireError};

/// Role a party plays in a query.
///
/// Discriminants are bit flags so a configured peer can declare several roles at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Role {
    DataOwner = 1,
    Dealer = 2,
    Recipient = 4,
    Analyst = 8,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::DataOwner, Role::Dealer, Role::Recipient, Role::Analyst];

    /// Decode role from its flag value.
    pub fn from_flag(flag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|role| *role as u8 == flag)
    }

    /// Roles contained in a bit mask.
    pub fn from_mask(mask: u8) -> impl Iterator<Item = Role> {
        Self::ALL
            .into_iter()
            .filter(move |role| mask & (*role as u8) != 0)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::DataOwner => "dataowner",
            Role::Dealer => "dealer",
            Role::Recipient => "recipient",
            Role::Analyst => "analyst",
        };
        f.write_str(name)
    }
}

/// Identity of one party in one role.
///
/// Two identities are equal when organization and role match; the vertical only
/// takes part in comparisons for data owners.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub org: u128,
    pub role: Role,
    pub vertical: u32,
}

impl Identity {
    pub fn new(org: u128, role: Role, vertical: u32) -> Self {
        Self {
            org,
            role,
            vertical,
        }
    }

    pub fn data_owner(org: u128, vertical: u32) -> Self {
        Self::new(org, Role::DataOwner, vertical)
    }

    pub fn dealer(org: u128) -> Self {
        Self::new(org, Role::Dealer, 0)
    }

    pub fn recipient(org: u128) -> Self {
        Self::new(org, Role::Recipient, 0)
    }

    pub fn is_data_owner(&self) -> bool {
        self.role == Role::DataOwner
    }

    fn key(&self) -> (u128, Role, u32) {
        let vertical = if self.is_data_owner() { self.vertical } else { 0 };
        (self.org, self.role, vertical)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_data_owner() {
            write!(f, "{:x}/{}/{}", self.org, self.role, self.vertical)
        } else {
            write!(f, "{:x}/{}", self.org, self.role)
        }
    }
}

impl Wire for Identity {
    fn write(&self, w: &mut MessageWriter) {
        w.write_u128(self.org);
        w.write_u8(self.role as u8);
        w.write_u32(self.vertical);
    }

    fn read(r: &mut MessageReader<'_>) -> Result<Self, WireError> {
        let org = r.read_u128()?;
        let flag = r.read_u8()?;
        let role = Role::from_flag(flag).ok_or(WireError::InvalidRole(flag))?;
        let vertical = r.read_u32()?;
        Ok(Self::new(org, role, vertical))
    }
}

/// Participants of one protocol instance.
///
/// Data owners are grouped by vertical and kept sorted, so every member iterates
/// them in the same order. Analysts never take part in protocol instances.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PeerSet {
    dealer: Option<Identity>,
    recipients: Vec<Identity>,
    verticals: Vec<Vec<Identity>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert identity. Returns false if it was already present or cannot be a member.
    pub fn add(&mut self, id: Identity) -> bool {
        match id.role {
            Role::Dealer => {
                if self.dealer == Some(id) {
                    return false;
                }
                self.dealer = Some(id);
                true
            }
            Role::Recipient => insert_sorted(&mut self.recipients, id),
            Role::DataOwner => {
                let vertical = id.vertical as usize;
                if self.verticals.len() <= vertical {
                    self.verticals.resize_with(vertical + 1, Vec::new);
                }
                insert_sorted(&mut self.verticals[vertical], id)
            }
            Role::Analyst => false,
        }
    }

    /// Remove identity. Returns false if it was not present.
    pub fn remove(&mut self, id: &Identity) -> bool {
        let removed = match id.role {
            Role::Dealer if self.dealer.as_ref() == Some(id) => {
                self.dealer = None;
                true
            }
            Role::Dealer => false,
            Role::Recipient => remove_sorted(&mut self.recipients, id),
            Role::DataOwner => match self.verticals.get_mut(id.vertical as usize) {
                Some(owners) => remove_sorted(owners, id),
                None => false,
            },
            Role::Analyst => false,
        };
        self.strip_empty_verticals();
        removed
    }

    pub fn remove_dealer(&mut self) {
        self.dealer = None;
    }

    pub fn remove_recipients(&mut self) {
        self.recipients.clear();
    }

    /// Copy restricted to data owners.
    pub fn data_owners_only(&self) -> Self {
        Self {
            dealer: None,
            recipients: Vec::new(),
            verticals: self.verticals.clone(),
        }
    }

    pub fn contains(&self, id: &Identity) -> bool {
        match id.role {
            Role::Dealer => self.dealer.as_ref() == Some(id),
            Role::Recipient => self.recipients.binary_search(id).is_ok(),
            Role::DataOwner => self
                .verticals
                .get(id.vertical as usize)
                .map_or(false, |owners| owners.binary_search(id).is_ok()),
            Role::Analyst => false,
        }
    }

    pub fn dealer(&self) -> Option<&Identity> {
        self.dealer.as_ref()
    }

    pub fn recipients(&self) -> &[Identity] {
        &self.recipients
    }

    pub fn verticals(&self) -> &[Vec<Identity>] {
        &self.verticals
    }

    pub fn vertical(&self, vertical: u32) -> &[Identity] {
        self.verticals
            .get(vertical as usize)
            .map_or(&[], |owners| owners.as_slice())
    }

    /// Data owners, vertical by vertical.
    pub fn data_owners(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.verticals.iter().flatten()
    }

    pub fn num_data_owners(&self) -> usize {
        self.verticals.iter().map(Vec::len).sum()
    }

    pub fn first_data_owner(&self) -> Option<&Identity> {
        self.data_owners().next()
    }

    /// Position of a data owner in iteration order.
    pub fn data_owner_index(&self, id: &Identity) -> Option<usize> {
        self.data_owners().position(|other| other == id)
    }

    /// The data owner that gathers and rebroadcasts masked values.
    pub fn revealer(&self) -> Option<&Identity> {
        self.first_data_owner()
    }

    /// Every member: dealer, recipients, then data owners.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.dealer
            .iter()
            .chain(self.recipients.iter())
            .chain(self.data_owners())
    }

    pub fn len(&self) -> usize {
        self.dealer.iter().count() + self.recipients.len() + self.num_data_owners()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn strip_empty_verticals(&mut self) {
        while matches!(self.verticals.last(), Some(owners) if owners.is_empty()) {
            self.verticals.pop();
        }
    }
}

impl FromIterator<Identity> for PeerSet {
    fn from_iter<T: IntoIterator<Item = Identity>>(iter: T) -> Self {
        let mut peers = PeerSet::new();
        for id in iter {
            peers.add(id);
        }
        peers
    }
}

impl fmt::Display for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "}}")
    }
}

impl Wire for PeerSet {
    fn write(&self, w: &mut MessageWriter) {
        match &self.dealer {
            Some(dealer) => {
                w.write_u8(1);
                dealer.write(w);
            }
            None => w.write_u8(0),
        }
        w.write_u32(self.recipients.len() as u32);
        for id in &self.recipients {
            id.write(w);
        }
        w.write_u32(self.verticals.len() as u32);
        for owners in &self.verticals {
            w.write_u32(owners.len() as u32);
            for id in owners {
                id.write(w);
            }
        }
    }

    fn read(r: &mut MessageReader<'_>) -> Result<Self, WireError> {
        let mut peers = PeerSet::new();
        match r.read_u8()? {
            0 => {}
            1 => {
                peers.add(Identity::read(r)?);
            }
            flag => return Err(WireError::InvalidFlag(flag)),
        }
        for _ in 0..r.read_u32()? {
            peers.add(Identity::read(r)?);
        }
        let num_verticals = r.read_u32()?;
        for _ in 0..num_verticals {
            for _ in 0..r.read_u32()? {
                peers.add(Identity::read(r)?);
            }
        }
        Ok(peers)
    }
}

fn insert_sorted(list: &mut Vec<Identity>, id: Identity) -> bool {
    match list.binary_search(&id) {
        Ok(_) => false,
        Err(pos) => {
            list.insert(pos, id);
            true
        }
    }
}

fn remove_sorted(list: &mut Vec<Identity>, id: &Identity) -> bool {
    match list.binary_search(id) {
        Ok(pos) => {
            list.remove(pos);
            true
        }
        Err(_) => false,
    }
}
