mod logger;
mod server;
mod static_files;

use clap::Parser;
use log::{Level, debug, error, log_enabled};
use std::process::ExitCode;

use server::HttpServer;
use server::config::ServerConfig;
use server::shutdown::ShutdownSignal;

fn main() -> ExitCode {
    let config = ServerConfig::parse();
    logger::init(config.log_level());

    debug!("Starting with config: {:?}", ServerConfig { password: None, ..config.clone() });

    let shutdown = match ShutdownSignal::install() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            error!("Cannot install signal handlers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = match HttpServer::new(&config) {
        Ok(server) => server,
        Err(e) => {
            if log_enabled!(Level::Error) {
                error!("{}", e);
            } else {
                eprintln!("{}", e);
            }
            return ExitCode::FAILURE;
        }
    };

    match server.run(shutdown) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server loop failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
