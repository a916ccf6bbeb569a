use std::{fs::File, io::BufReader, net::SocketAddr, path::Path};

use serde::Deserialize;

use super::TransportError;
use crate::identity::{Identity, Role};

/// Addresses of every party of a deployment.
///
/// The order of `parties` fixes the party numbers used by the transport: a party
/// listens for lower numbers and connects to higher ones.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub parties: Vec<NetworkPartyConfig>,
}

#[derive(Clone, Debug)]
pub struct NetworkPartyConfig {
    pub identity: Identity,
    pub address: SocketAddr,
}

/// Raw parsed JSON configuration file.
#[derive(Clone, Debug, Deserialize)]
struct RawNetworkConfig {
    parties: Vec<RawNetworkPartyConfig>,
}

/// Raw parsed JSON party entry. Organization ids are decimal strings since they
/// do not fit a JSON number.
#[derive(Clone, Debug, Deserialize)]
struct RawNetworkPartyConfig {
    org: String,
    role: Role,
    #[serde(default)]
    vertical: u32,
    address: SocketAddr,
}

impl NetworkConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let file = File::open(path)?;
        let raw: RawNetworkConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn parse(json: &str) -> Result<Self, TransportError> {
        let raw: RawNetworkConfig =
            serde_json::from_str(json).map_err(|e| TransportError::Config(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawNetworkConfig) -> Result<Self, TransportError> {
        let parties: Vec<NetworkPartyConfig> = raw
            .parties
            .into_iter()
            .map(|p| {
                let org = p
                    .org
                    .parse::<u128>()
                    .map_err(|e| {
                        TransportError::Config(format!("organization id {:?}: {}", p.org, e))
                    })?;
                Ok(NetworkPartyConfig {
                    identity: Identity::new(org, p.role, p.vertical),
                    address: p.address,
                })
            })
            .collect::<Result<_, TransportError>>()?;

        for (i, a) in parties.iter().enumerate() {
            if parties[..i].iter().any(|b| b.identity == a.identity) {
                return Err(TransportError::Config(format!("party {} listed twice", a.identity)));
            }
        }
        Ok(Self { parties })
    }

    /// Party number of `identity`.
    pub fn index_of(&self, identity: &Identity) -> Option<usize> {
        self.parties.iter().position(|p| p.identity == *identity)
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.parties.iter().map(|p| p.identity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "parties": [
            { "org": "1", "role": "data_owner", "vertical": 0, "address": "127.0.0.1:7001" },
            { "org": "2", "role": "data_owner", "vertical": 1, "address": "127.0.0.1:7002" },
            { "org": "3", "role": "dealer", "address": "127.0.0.1:7003" },
            { "org": "340282366920938463463374607431768211455", "role": "recipient", "address": "127.0.0.1:7004" }
        ]
    }"#;

    #[test]
    fn test_parse() {
        let config = NetworkConfig::parse(CONFIG).unwrap();
        assert_eq!(config.parties.len(), 4);
        assert_eq!(config.index_of(&Identity::dealer(3)), Some(2));
        assert_eq!(config.index_of(&Identity::recipient(u128::MAX)), Some(3));
        assert_eq!(config.index_of(&Identity::data_owner(2, 0)), None);
        assert_eq!(config.parties[1].address.port(), 7002);
    }

    #[test]
    fn test_rejects_duplicates_and_bad_ids() {
        let duplicate = r#"{ "parties": [
            { "org": "1", "role": "dealer", "address": "127.0.0.1:1" },
            { "org": "1", "role": "dealer", "address": "127.0.0.1:2" }
        ] }"#;
        assert!(matches!(NetworkConfig::parse(duplicate), Err(TransportError::Config(_))));
        let bad = r#"{ "parties": [ { "org": "x", "role": "dealer", "address": "127.0.0.1:1" } ] }"#;
        assert!(matches!(NetworkConfig::parse(bad), Err(TransportError::Config(_))));
    }
}
