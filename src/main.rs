//! rnews: offer a news batch to the local server, spooling what cannot be delivered

use clap::{ArgAction, Parser};
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use usenet_rnews::{BatchContext, Config, Ingester, PeerId, Result, Undelivered, protocol};

/// Batch spooled for a later sweep
const EXIT_SPOOLED: u8 = 2;
/// Hard failure: nothing could be delivered or spooled
const EXIT_FAILURE: u8 = 1;
/// Batch not delivered and spooling disabled with `-N`
const EXIT_NOT_SPOOLED: u8 = 9;

#[derive(Parser, Debug)]
#[command(name = "rnews", version)]
#[command(
    about = "Unpack news batches and offer their articles to a news server",
    long_about = None
)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Peer the batch came from
    #[arg(short = 'h', value_name = "PEER", env = "UUCPHOST")]
    peer: Option<String>,

    /// Never spool: exit with status 9 if the batch cannot be delivered
    #[arg(short = 'N', conflicts_with = "unspool")]
    no_spool: bool,

    /// Replay spooled batches instead of reading input
    #[arg(short = 'U', conflicts_with = "input")]
    unspool: bool,

    /// Server port
    #[arg(short = 'P', value_name = "PORT")]
    port: Option<u16>,

    /// Log rejected article previews and debug events
    #[arg(short = 'v')]
    verbose: bool,

    /// Server host
    #[arg(short = 'r', short_alias = 'S', value_name = "SERVER")]
    server: Option<String>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Batch file (default: standard input)
    input: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "rnews failed");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.peer.port = port;
    }
    if let Some(server) = cli.server {
        config.peer.host = server;
    }
    config.validate()?;

    let ingester = Ingester::new(config.clone());

    if cli.unspool {
        let mut session = protocol::connect(&config.peer)?;
        let report = ingester.sweep(&mut session, cli.verbose)?;
        session.quit();
        info!(entries = report.entries.len(), "unspool finished");
        return Ok(ExitCode::SUCCESS);
    }

    let (input, name) = open_input(cli.input.as_deref())?;
    let peer = PeerId::new(cli.peer.unwrap_or_default());
    let ctx = BatchContext::new(peer, name).verbose(cli.verbose);

    let mut session = match protocol::connect(&config.peer) {
        Ok(session) => session,
        Err(e) => {
            warn!(peer = %ctx.peer, error = %e, "cant open_remote");
            if cli.no_spool {
                return Ok(ExitCode::from(EXIT_NOT_SPOOLED));
            }
            ingester.spool_all(&ctx, &input)?;
            return Ok(ExitCode::from(EXIT_SPOOLED));
        }
    };

    let (_, undelivered) = ingester.ingest(&ctx, &input, &mut session, !cli.no_spool)?;
    session.quit();

    Ok(match undelivered {
        Undelivered::Nothing => ExitCode::SUCCESS,
        Undelivered::Spooled(_) => ExitCode::from(EXIT_SPOOLED),
        Undelivered::NotSpooled => ExitCode::from(EXIT_NOT_SPOOLED),
    })
}

/// Open the batch, making sure the unread remainder stays addressable
///
/// Standard input that is not a seekable file at offset 0 is copied into an
/// anonymous temporary file first.
fn open_input(path: Option<&Path>) -> Result<(File, String)> {
    if let Some(path) = path {
        return Ok((File::open(path)?, path.display().to_string()));
    }

    let stdin = io::stdin();
    let mut file = File::from(stdin.as_fd().try_clone_to_owned()?);
    if matches!(file.stream_position(), Ok(0)) {
        return Ok((file, "stdin".to_string()));
    }

    let mut copy = tempfile::tempfile()?;
    io::copy(&mut file, &mut copy)?;
    copy.seek(SeekFrom::Start(0))?;
    Ok((copy, "stdin".to_string()))
}
