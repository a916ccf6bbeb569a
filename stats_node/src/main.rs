mod driver;

use std::{path::PathBuf, process::ExitCode};

use argh::FromArgs;
use mpc::{runtime::Envelope, transport::{self, NetworkConfig}};
use mpc_stats::{Files, Query, StudyConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

use driver::NodeError;

/// One party of a private statistics query.
#[derive(FromArgs, Debug)]
struct Options {
    /// path to network configuration file
    #[argh(option)]
    network: PathBuf,

    /// this party's number in the network configuration
    #[argh(option)]
    id: usize,

    /// path to the study configuration
    #[argh(option)]
    study: PathBuf,

    /// path to the query
    #[argh(option)]
    query: PathBuf,

    /// this party's input CSV, for data owners
    #[argh(option, default = "PathBuf::new()")]
    csv: PathBuf,

    /// directory holding the F and t tables
    #[argh(option, default = "PathBuf::from(\".\")")]
    tables: PathBuf,
}

async fn run(options: Options) -> Result<(), NodeError> {
    let network = NetworkConfig::load(&options.network)?;
    let study = StudyConfig::load(&options.study)?;
    let query = Query::load(&options.query)?;
    let parties = network.identities();
    let me = *parties
        .get(options.id)
        .ok_or_else(|| {
            transport::TransportError::Config(format!("no party number {}", options.id))
        })?;

    let files = Files {
        csv: &options.csv,
        tables: &options.tables,
    };
    let launch =
        mpc_stats::dispatch(&files, &query, &study, &me).ok_or(NodeError::NotParticipating)?;
    let mut connection = transport::connect_multiparty::<Envelope>(&network, options.id).await?;
    if let Some(result) = driver::run_party(me, &parties, &mut connection, launch).await? {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("cannot print result: {}", e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options: Options = argh::from_env();
    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
