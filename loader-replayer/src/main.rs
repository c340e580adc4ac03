//! Replays a newline-delimited JSON change stream into a MySQL-compatible destination.

use std::path::PathBuf;

use clap::Parser;
use loader::apply::{Loader, LoaderOptions};
use loader::database::MySqlDatabase;
use loader::ddl::MySqlDdlErrorClassifier;
use loader::executor::Executor;
use loader::metrics::register_metrics;
use loader_config::shared::ReplayerConfig;
use loader_telemetry::metrics::init_metrics;
use loader_telemetry::tracing::init_tracing;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

use crate::config::load_replayer_config;
use crate::error::{ReplayerError, ReplayerResult};
use crate::source::JsonLinesSource;

mod config;
mod error;
mod source;

#[derive(Parser)]
#[command(name = "loader-replayer", about = "Replay a change stream into MySQL")]
struct Args {
    /// Change stream file, `-` reading standard input.
    #[arg(long, default_value = "-")]
    input: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprint!("{}", err.render_report());
        std::process::exit(1);
    }
}

fn run() -> ReplayerResult<()> {
    let args = Args::parse();

    let replayer_config = load_replayer_config()?;

    init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplayerError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(replayer_config, args.input))
}

async fn async_main(replayer_config: ReplayerConfig, input: PathBuf) -> ReplayerResult<()> {
    if let Some(port) = replayer_config.metrics_port {
        init_metrics(port, Some(env!("CARGO_BIN_NAME"))).map_err(ReplayerError::config)?;
        info!(port, "serving metrics");
    }
    register_metrics();

    let loader_config = &replayer_config.loader;
    let database = MySqlDatabase::connect(&loader_config.destination).await?;
    let executor = Executor::new(database)
        .with_batch_size(loader_config.batch.max_size)
        .with_default_schema(loader_config.destination.name.clone());
    let loader = Loader::new(
        executor,
        MySqlDdlErrorClassifier,
        LoaderOptions::from(loader_config),
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input.as_os_str() == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(&input).await?))
    };
    let mut source = JsonLinesSource::new(reader);

    info!(input = %input.display(), safe_mode = loader_config.safe_mode, "starting replay");

    match loader.run(&mut source).await {
        Ok(stats) => {
            info!(
                items = stats.items,
                changes = stats.changes,
                ignored_ddl_errors = stats.ignored_ddl_errors,
                "replay finished"
            );
            Ok(())
        }
        Err(err) => {
            error!("{err}");
            Err(err.into())
        }
    }
}
