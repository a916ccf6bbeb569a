//! Feeds one party's runtime from its network connections.

use futures::{Sink, Stream};
use mpc::{
    runtime::{Envelope, Runtime},
    transport::{MultipartyTransport, TransportError},
    Identity, ProtocolError,
};
use mpc_stats::{ConfigError, Launch, QueryResult};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{0} is not in the network configuration")]
    UnknownParty(Identity),
    #[error("this party takes no part in the query")]
    NotParticipating,
}

/// Runs `launch` to completion. `parties[i]` is the identity behind party number `i`
/// of `transport`. Returns the query result if this party is a recipient.
pub async fn run_party<E, C>(
    me: Identity,
    parties: &[Identity],
    transport: &mut MultipartyTransport<Envelope, C>,
    launch: Launch,
) -> Result<Option<QueryResult>, NodeError>
where
    C: Stream<Item = Result<Envelope, E>> + Sink<Envelope> + Unpin,
{
    let instance = launch.instance;
    let mut runtime = Runtime::new(me);
    runtime.start(instance, launch.fronctocol, launch.peers)?;

    loop {
        for out in runtime.drain_outgoing() {
            let to = parties
                .iter()
                .position(|id| *id == out.to)
                .ok_or(NodeError::UnknownParty(out.to))?;
            transport.send_to(to, out.envelope).await?;
        }
        if runtime.is_finished(&instance) {
            break;
        }
        let (from, envelope) = transport.receive_any().await?;
        let from = *parties
            .get(from)
            .ok_or_else(|| TransportError::Config(format!("no party number {}", from)))?;
        debug!(%from, instance = %envelope.instance, "frame");
        runtime.deliver(from, envelope)?;
    }
    info!(%me, "query finished");

    if launch.yields_result {
        Ok(runtime.take_output::<QueryResult>(&instance).transpose()?)
    } else {
        runtime.take_output::<()>(&instance).transpose()?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use mpc::transport::mock_multiparty_channels;
    use mpc_stats::{
        config::VerticalSpec, csv_input::CsvTable, startup::Inputs, table::StatTable, Query,
        StudyConfig,
    };

    use super::*;

    const STUDY: &str = r#"{
        "studyId": "1",
        "maxListSize": 4,
        "keyMax": 16,
        "valueBits": 4,
        "lexicon": [
            { "verticalIndex": 0, "columns": [ { "type": "integer", "name": "id" } ] },
            { "verticalIndex": 1, "columns": [
                { "type": "integer", "name": "id" },
                { "type": "real", "name": "y" }
            ] }
        ],
        "peers": [
            { "organizationId": "1", "dataowner": { "vertical": 0 } },
            { "organizationId": "2", "dataowner": { "vertical": 1 } },
            { "organizationId": "3", "dealer": {} },
            { "organizationId": "4", "recipient": {} }
        ]
    }"#;

    const QUERY: &str = r#"{ "id": "mean",
        "joinStatement": { "joinOns": [
            { "first": { "col": { "vertical": 0, "columnIndex": 0 } },
              "second": { "col": { "vertical": 1, "columnIndex": 0 } } } ] },
        "function": { "type": "MomentFunction",
            "col": { "vertical": 1, "columnName": "y" }, "momentType": "mean", "bits_of_precision": 3 } }"#;

    struct Csv(Option<&'static str>);

    impl Inputs for Csv {
        fn csv(&self, vertical: &VerticalSpec) -> Result<CsvTable, ConfigError> {
            let text = self.0.ok_or_else(|| ConfigError::invalid("no csv"))?;
            CsvTable::parse(text, "party.csv", vertical)
        }

        fn f_table(&self, _: usize, _: usize, _: usize) -> Result<StatTable, ConfigError> {
            Err(ConfigError::invalid("no tables"))
        }

        fn t_table(&self, _: usize, _: usize) -> Result<StatTable, ConfigError> {
            Err(ConfigError::invalid("no tables"))
        }
    }

    #[tokio::test]
    async fn test_mean_over_channels() {
        let study = StudyConfig::parse(STUDY).unwrap();
        let query = Query::parse(QUERY).unwrap();
        let parties: Vec<Identity> = study.identities().copied().collect();
        let files = [Some("id\n1\n2\n3\n"), Some("id,y\n2,1.5\n3,4.5\n7,8\n"), None, None];

        let mut transports = mock_multiparty_channels::<Envelope>(parties.len(), 1 << 20);
        let runs = transports.iter_mut().zip(&parties).zip(files).map(|((transport, me), csv)| {
            let launch = mpc_stats::dispatch(&Csv(csv), &query, &study, me).unwrap();
            run_party(*me, &parties, transport, launch)
        });
        let results = join_all(runs).await;

        for result in &results[..3] {
            assert!(matches!(result, Ok(None)));
        }
        match &results[3] {
            Ok(Some(QueryResult::Moments(m))) => {
                assert_eq!(m.count, Some(2));
                assert!((m.mean.unwrap() - 3.0).abs() < 0.125);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
