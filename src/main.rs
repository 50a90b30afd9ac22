use std::io::IsTerminal;
use std::path::PathBuf;

use argh::FromArgs;
use exitcode::ExitCode;
use sluice::client::{IngestClient, TokenSource};
use sluice::config::Config;
use sluice::http::HttpClient;
use sluice::pipeline::{Pipeline, PipelineOutcome};
use sluice::sources::{self, Format};
use sluice::trace;
use tracing::{error, info};

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .expect("get available working threads")
        .get()
}

#[derive(FromArgs)]
#[argh(
    description = "Sluice streams file events into Splunk Cloud in bounded batches",
    help_triggers("-h", "--help")
)]
struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from the given file"
    )]
    config: Option<PathBuf>,

    #[argh(
        option,
        short = 'f',
        default = "Format::Json",
        description = "input format, csv or json"
    )]
    format: Format,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the tokio runtime will use"
    )]
    threads: usize,

    #[argh(
        positional,
        description = "input file, events are read from stdin when omitted"
    )]
    input: Option<PathBuf>,
}

fn main() {
    std::process::exit(run())
}

fn run() -> ExitCode {
    let opts: RootCommand = argh::from_env();

    if opts.version {
        println!("sluice {}", sluice::get_version());
        return exitcode::OK;
    }

    let color = std::io::stdout().is_terminal();
    trace::init(color, &opts.log_level);

    let Some(config_path) = &opts.config else {
        error!(message = "no config file, pass one with --config");
        return exitcode::CONFIG;
    };

    let mut config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(message = "failed to load config", %err);
            return exitcode::CONFIG;
        }
    };

    if let Ok(client_id) = std::env::var("SLUICE_CLIENT_ID") {
        config.auth.client_id = client_id;
    }
    if let Ok(client_secret) = std::env::var("SLUICE_CLIENT_SECRET") {
        config.auth.client_secret = client_secret;
    }

    let batch = match config.batch.validate() {
        Ok(settings) => settings,
        Err(err) => {
            error!(message = "invalid batch config", %err);
            return exitcode::CONFIG;
        }
    };
    let retry = match config.request.validate() {
        Ok(settings) => settings,
        Err(err) => {
            error!(message = "invalid request config", %err);
            return exitcode::CONFIG;
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sluice-worker")
        .worker_threads(opts.threads)
        .enable_io()
        .enable_time()
        .build()
        .unwrap();

    let code = runtime.block_on(async {
        info!(
            message = "start sluice",
            threads = opts.threads,
            config = ?config_path
        );

        let client = match HttpClient::new() {
            Ok(client) => client,
            Err(err) => {
                error!(message = "failed to build http client", %err);
                return exitcode::SOFTWARE;
            }
        };

        let token_url = match config.auth.token_url.parse() {
            Ok(uri) => uri,
            Err(err) => {
                error!(message = "invalid token url", %err);
                return exitcode::CONFIG;
            }
        };
        let tokens = TokenSource::new(
            client.clone(),
            token_url,
            config.auth.client_id.clone(),
            config.auth.client_secret.clone(),
        );

        let ingest = match IngestClient::new(client, &config.endpoint, &config.tenant, tokens) {
            Ok(ingest) => ingest,
            Err(err) => {
                error!(message = "invalid endpoint", %err);
                return exitcode::CONFIG;
            }
        };

        if let Err(err) = ingest.authenticate().await {
            error!(message = "authentication failed", %err);
            return exitcode::NOPERM;
        }

        let (mut pipeline, submitter) = Pipeline::start(batch, retry, ingest);

        let properties = config.properties.clone();
        let format = opts.format;
        let input = opts.input.clone();
        let producer = tokio::task::spawn_blocking(move || -> sluice::Result<u64> {
            match input {
                Some(path) => {
                    let file = std::fs::File::open(&path)?;
                    let reader = std::io::BufReader::new(file);

                    Ok(sources::produce(format, reader, &properties, &submitter)?)
                }
                None => Ok(sources::produce(
                    format,
                    std::io::stdin().lock(),
                    &properties,
                    &submitter,
                )?),
            }
        });

        let mut source_failed = false;
        tokio::select! {
            result = producer => match result {
                Ok(Ok(produced)) => info!(message = "input exhausted", produced),
                Ok(Err(err)) => {
                    error!(message = "producer failed", %err);
                    source_failed = true;
                }
                Err(err) => {
                    error!(message = "producer task failed", %err);
                    source_failed = true;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!(message = "received interrupt, draining");
            }
            _ = pipeline.crashed() => {
                // the writer already logged the failure, just drain
            }
        }

        let report = pipeline.close().await;
        info!(
            message = "pipeline closed",
            events = report.counters.events_accepted,
            bytes = report.counters.bytes_accepted,
            emitted = report.counters.batches_emitted,
            delivered = report.counters.batches_delivered,
            failed = report.counters.batches_failed
        );

        match report.outcome {
            PipelineOutcome::Completed if source_failed => exitcode::IOERR,
            PipelineOutcome::Completed => exitcode::OK,
            PipelineOutcome::DeliveryFailed(_) => exitcode::UNAVAILABLE,
        }
    });

    // a producer stuck on stdin must not keep the process alive
    runtime.shutdown_background();

    code
}
