//! Example server exposing the arithmetic demo service.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use rpc_utils::{DEFAULT_PORT, LogLevel, ServerWrapper, logger};
use rpc_utils_demo::signals::stop_on_signal;
use rpc_utils_demo::{Error, FUNCTIONS, register_demo_functions};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(default_value_t = DEFAULT_PORT, env = "RPC_UTILS_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "RPC_UTILS_ADDRESS")]
    address: String,

    /// Background worker threads; 0 serves on the main thread
    #[arg(long, default_value_t = 0, env = "RPC_UTILS_WORKERS")]
    workers: usize,

    /// Minimum level to log
    #[arg(long, default_value = "debug", env = "RPC_UTILS_LOG_LEVEL")]
    log_level: LogLevel,
}

fn serve(args: &Args) -> Result<(), Error> {
    let server = ServerWrapper::with_address(&args.address, args.port)?;
    register_demo_functions(&server)?;

    logger::info(format!("Starting RPC server on port {}", server.port()));
    logger::info("Available functions:");
    for (_, signature) in FUNCTIONS {
        logger::info(format!("  - {signature}"));
    }
    logger::info("Press Ctrl+C to stop the server");

    stop_on_signal(server.stop_handle())?;

    if args.workers == 0 {
        server.run()?;
    } else {
        server.async_run(args.workers)?;
        logger::info(format!(
            "Serving on {} background worker threads",
            args.workers
        ));
        while server.is_running() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    logger::info("Server stopped");
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::set_level(args.log_level);
    logger::init();

    match serve(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger::error(format!("Server error: {e}"));
            ExitCode::FAILURE
        }
    }
}
