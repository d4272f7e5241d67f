use clap::Parser;
use std::process::ExitCode;

use encserve::args::{Args, Config};
use encserve::log_error;
use encserve::logging::setup_logging;
use encserve::server::start_server;

fn main() -> ExitCode {
    setup_logging();
    let config = Config::from_args(Args::parse());

    match start_server(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error!(e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
