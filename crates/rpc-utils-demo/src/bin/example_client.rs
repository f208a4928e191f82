//! Example client that walks through every function of the demo service.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::process::ExitCode;

use clap::Parser;
use rpc_utils::client::DEFAULT_TIMEOUT_MS;
use rpc_utils::{ClientWrapper, DEFAULT_PORT, LogLevel, is_valid_host, is_valid_port, logger};
use rpc_utils_demo::{Error, run_scenario};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Server host
    #[arg(default_value = "localhost", env = "RPC_UTILS_HOST")]
    host: String,

    /// Server port
    #[arg(default_value_t = DEFAULT_PORT, env = "RPC_UTILS_PORT")]
    port: u16,

    /// Per-call timeout in milliseconds; zero or negative disables it
    #[arg(
        long,
        default_value_t = DEFAULT_TIMEOUT_MS,
        allow_negative_numbers = true,
        env = "RPC_UTILS_TIMEOUT_MS"
    )]
    timeout_ms: i64,

    /// Minimum level to log
    #[arg(long, default_value = "info", env = "RPC_UTILS_LOG_LEVEL")]
    log_level: LogLevel,
}

fn run(args: &Args) -> Result<(), Error> {
    if !is_valid_host(&args.host) {
        return Err(Error::InvalidHost(args.host.clone()));
    }
    if !is_valid_port(args.port) {
        return Err(Error::InvalidPort(args.port));
    }

    logger::info(format!("Connecting to {}:{}", args.host, args.port));
    let client = ClientWrapper::new(&args.host, args.port, args.timeout_ms)?;
    logger::info("Connected successfully");

    let report = run_scenario(&client)?;
    logger::debug(format!("{report:?}"));
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::set_level(args.log_level);
    logger::init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger::error(format!("Client error: {e}"));
            ExitCode::FAILURE
        }
    }
}
