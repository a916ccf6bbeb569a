use std::{io, time::Duration};

use futures::{future, stream::FuturesUnordered, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use super::{
    wrap_bincode, BincodeStreamSink, MultipartyTransport, NetworkConfig, NetworkPartyConfig,
    TransportError,
};

/// Delay in milliseconds after which connection to peer is retried.
const CONNECTION_RETRY_DELAY: u64 = 1000;

const HANDSHAKE_MAGIC: u32 = 0xDEADBEEF;

/// Bincode-encoded network channel.
pub type NetChannel<T> = BincodeStreamSink<T, TcpStream>;

/// Connect party `party_id` to every other party of `config`.
///
/// Lower-numbered parties are accepted on this party's address, higher-numbered
/// ones are dialled until they answer.
pub async fn connect_multiparty<T>(
    config: &NetworkConfig,
    party_id: usize,
) -> Result<MultipartyTransport<T, NetChannel<T>>, TransportError>
where
    T: Serialize + DeserializeOwned,
{
    let parties = &config.parties;
    let this_party = parties
        .get(party_id)
        .ok_or_else(|| TransportError::Config(format!("no party number {}", party_id)))?;
    info!(
        party = party_id,
        identity = %this_party.identity,
        addr = %this_party.address,
        "connecting"
    );

    let listen_for = listen_for_parties(this_party, party_id);
    let connect_to = future::try_join_all(
        parties[party_id + 1..]
            .iter()
            .map(|other| connect_to_party(other, party_id)),
    );
    let (accepted, connected) = futures::try_join!(listen_for, connect_to)?;
    info!(party = party_id, peers = parties.len() - 1, "connected");

    let channels = accepted
        .into_iter()
        .map(Some)
        .chain(std::iter::once(None))
        .chain(connected.into_iter().map(Some))
        .map(|x| x.map(wrap_bincode));

    MultipartyTransport::new(channels, party_id)
}

/// Accept one connection from each of the `count` lower-numbered parties.
async fn listen_for_parties(
    this_party: &NetworkPartyConfig,
    count: usize,
) -> Result<Vec<TcpStream>, io::Error> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let listener = TcpListener::bind(this_party.address).await?;
    let mut handshakes = FuturesUnordered::new();
    let mut connected: Vec<Option<TcpStream>> = (0..count).map(|_| None).collect();

    while connected.iter().any(Option::is_none) {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, addr) = accepted?;
                debug!(%addr, "incoming connection");
                handshakes.push(accept_party(socket, count));
            },
            done = handshakes.next(), if !handshakes.is_empty() => {
                match done {
                    Some(Ok((socket, id))) if connected[id].is_none() => {
                        connected[id] = Some(socket)
                    }
                    Some(Ok((_, id))) => warn!(party = id, "duplicate connection ignored"),
                    Some(Err(e)) => warn!(error = %e, "handshake failed"),
                    None => {}
                }
            },
        }
    }

    Ok(connected.into_iter().flatten().collect())
}

/// Read the handshake of an incoming connection and answer it.
async fn accept_party(
    mut socket: TcpStream,
    count: usize,
) -> Result<(TcpStream, usize), io::Error> {
    if socket.read_u32().await? != HANDSHAKE_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid magic"));
    }

    let party_id = socket.read_u32().await? as usize;
    if party_id >= count {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid party number"));
    }

    socket.write_u32(HANDSHAKE_MAGIC).await?;
    socket.flush().await?;

    Ok((socket, party_id))
}

/// Dial a higher-numbered party, retrying until it listens.
async fn connect_to_party(
    other: &NetworkPartyConfig,
    this_party_id: usize,
) -> Result<TcpStream, io::Error> {
    let mut socket = loop {
        match TcpStream::connect(other.address).await {
            Ok(socket) => break socket,
            Err(e) => {
                debug!(peer = %other.identity, error = %e, "connection refused, retrying");
                tokio::time::sleep(Duration::from_millis(CONNECTION_RETRY_DELAY)).await;
            }
        }
    };

    socket.write_u32(HANDSHAKE_MAGIC).await?;
    socket.write_u32(this_party_id as u32).await?;
    socket.flush().await?;

    if socket.read_u32().await? != HANDSHAKE_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid magic"));
    }

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fronctocol::InstanceId, runtime::Envelope};

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let config = NetworkConfig::parse(
            r#"{ "parties": [
                { "org": "1", "role": "data_owner", "vertical": 0, "address": "127.0.0.1:47311" },
                { "org": "2", "role": "data_owner", "vertical": 1, "address": "127.0.0.1:47312" },
                { "org": "3", "role": "dealer", "address": "127.0.0.1:47313" }
            ] }"#,
        )
        .unwrap();

        let tasks: Vec<_> = (0..3)
            .map(|id| {
                let config = config.clone();
                tokio::spawn(async move {
                    let mut transport = connect_multiparty::<Envelope>(&config, id).await.unwrap();
                    let envelope = Envelope {
                        instance: InstanceId::root("tcp"),
                        payload: vec![id as u8],
                    };
                    for other in (0..3).filter(|&other| other != id) {
                        transport.send_to(other, envelope.clone()).await.unwrap();
                    }
                    let mut senders = Vec::new();
                    for _ in 0..2 {
                        let (from, received) = transport.receive_any().await.unwrap();
                        assert_eq!(received.payload, vec![from as u8]);
                        senders.push(from);
                    }
                    senders.sort_unstable();
                    senders
                })
            })
            .collect();

        for (id, task) in tasks.into_iter().enumerate() {
            let senders = task.await.unwrap();
            assert_eq!(senders, (0..3).filter(|&other| other != id).collect::<Vec<_>>());
        }
    }
}
