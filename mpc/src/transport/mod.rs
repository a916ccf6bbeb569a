//! Framed point-to-point channels between the parties of a query.

mod config;
mod networking;

pub use config::*;
pub use networking::*;

use std::io;

use futures::{
    stream::{SplitSink, SplitStream},
    FutureExt, Sink, SinkExt, Stream, StreamExt,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_serde::formats::Bincode;
use tokio_util::codec::LengthDelimitedCodec;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("error while sending message to party {0}")]
    Send(usize),
    #[error("error while receiving message from party {0}")]
    Recv(usize),
    #[error("channel to party {0} is missing")]
    MissingChannel(usize),
    #[error("all peers closed their connections")]
    AllClosed,
    #[error("network configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Connections of one party to every other party, indexed by party number.
pub struct MultipartyTransport<T, Channel> {
    sinks: Vec<Option<SplitSink<Channel, T>>>,
    streams: Vec<Option<SplitStream<Channel>>>,
    party_id: usize,
}

impl<T, Channel> MultipartyTransport<T, Channel>
where
    Channel: Stream + Sink<T>,
{
    /// Wrap one channel per party; only the entry at `party_id` may be absent.
    pub fn new(
        channels: impl IntoIterator<Item = Option<Channel>>,
        party_id: usize,
    ) -> Result<Self, TransportError> {
        let mut sinks = Vec::new();
        let mut streams = Vec::new();
        for (j, channel) in channels.into_iter().enumerate() {
            match channel {
                Some(channel) => {
                    // Split so that receives and sends can be awaited independently.
                    let (sink, stream) = channel.split();
                    sinks.push(Some(sink));
                    streams.push(Some(stream));
                }
                None if j == party_id => {
                    sinks.push(None);
                    streams.push(None);
                }
                None => return Err(TransportError::MissingChannel(j)),
            }
        }
        Ok(Self {
            sinks,
            streams,
            party_id,
        })
    }
}

impl<T, Channel> MultipartyTransport<T, Channel> {
    pub fn num_parties(&self) -> usize {
        self.sinks.len()
    }

    pub fn party_id(&self) -> usize {
        self.party_id
    }
}

impl<T, E, Channel> MultipartyTransport<T, Channel>
where
    Channel: Stream<Item = Result<T, E>> + Sink<T> + Unpin,
{
    pub async fn send_to(&mut self, other_id: usize, msg: T) -> Result<(), TransportError> {
        let sink = self
            .sinks
            .get_mut(other_id)
            .and_then(Option::as_mut)
            .ok_or(TransportError::MissingChannel(other_id))?;
        sink.send(msg).await.map_err(|_| TransportError::Send(other_id))
    }

    pub async fn receive_from(&mut self, other_id: usize) -> Result<T, TransportError> {
        let stream = self
            .streams
            .get_mut(other_id)
            .and_then(Option::as_mut)
            .ok_or(TransportError::MissingChannel(other_id))?;
        match stream.next().await {
            Some(Ok(msg)) => Ok(msg),
            _ => Err(TransportError::Recv(other_id)),
        }
    }

    /// Next message from whichever party sends first.
    ///
    /// A peer that closes its connection is dropped from the selection; the call
    /// fails once no open connection is left.
    pub async fn receive_any(&mut self) -> Result<(usize, T), TransportError> {
        loop {
            let pending: Vec<_> = self
                .streams
                .iter_mut()
                .enumerate()
                .filter_map(|(id, stream)| {
                    stream.as_mut().map(|s| s.next().map(move |raw| (id, raw)))
                })
                .collect();
            if pending.is_empty() {
                return Err(TransportError::AllClosed);
            }
            let ((id, raw), _, _) = futures::future::select_all(pending).await;
            match raw {
                Some(Ok(msg)) => return Ok((id, msg)),
                Some(Err(_)) => return Err(TransportError::Recv(id)),
                None => {
                    debug!(party = id, "connection closed by peer");
                    self.streams[id] = None;
                }
            }
        }
    }
}

/// Length-framed Bincode-encoded messages channel.
pub type BincodeStreamSink<T, C> =
    tokio_serde::Framed<tokio_util::codec::Framed<C, LengthDelimitedCodec>, T, T, Bincode<T, T>>;

/// Length-framed Bincode-encoded tokio duplex stream.
pub type BincodeDuplex<T> = BincodeStreamSink<T, DuplexStream>;

pub fn wrap_bincode<T, C>(channel: C) -> BincodeStreamSink<T, C>
where
    C: AsyncRead + AsyncWrite,
{
    let length_delimited = tokio_util::codec::Framed::new(channel, LengthDelimitedCodec::new());
    tokio_serde::Framed::new(length_delimited, Bincode::default())
}

pub fn bincode_duplex<T>(max_buf_size: usize) -> (BincodeDuplex<T>, BincodeDuplex<T>) {
    let (a, b) = tokio::io::duplex(max_buf_size);
    (wrap_bincode(a), wrap_bincode(b))
}

/// In-process channels between `num_parties` parties, for tests.
pub fn mock_multiparty_channels<T>(
    num_parties: usize,
    max_buf_size: usize,
) -> Vec<MultipartyTransport<T, BincodeDuplex<T>>>
where
    T: Serialize + DeserializeOwned + Unpin,
{
    let mut matrix: Vec<Vec<_>> = (0..num_parties)
        .map(|_| (0..num_parties).map(|_| None).collect())
        .collect();

    for i in 0..num_parties {
        for j in 0..i {
            let (a, b) = bincode_duplex::<T>(max_buf_size);
            matrix[i][j] = Some(a);
            matrix[j][i] = Some(b);
        }
    }

    matrix
        .into_iter()
        .enumerate()
        .filter_map(|(id, row)| MultipartyTransport::new(row, id).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fronctocol::InstanceId, runtime::Envelope};

    #[tokio::test]
    async fn test_receive_any_returns_sender() {
        let mut parties = mock_multiparty_channels::<Envelope>(3, 1 << 16);
        let envelope = Envelope {
            instance: InstanceId::root("transport"),
            payload: vec![1, 2, 3],
        };
        parties[2].send_to(0, envelope.clone()).await.unwrap();
        let (from, received) = parties[0].receive_any().await.unwrap();
        assert_eq!(from, 2);
        assert_eq!(received, envelope);

        parties[1].send_to(0, envelope.clone()).await.unwrap();
        assert_eq!(parties[0].receive_from(1).await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_closed_peers() {
        let mut parties = mock_multiparty_channels::<Envelope>(2, 1 << 16);
        drop(parties.pop());
        let first = &mut parties[0];
        assert!(matches!(first.receive_any().await, Err(TransportError::AllClosed)));

        let envelope = Envelope {
            instance: InstanceId::root("closed"),
            payload: vec![],
        };
        let to_self = first.send_to(0, envelope).await;
        assert!(matches!(to_self, Err(TransportError::MissingChannel(0))));
    }
}
