use std::process::ExitCode;

use log::error;

use llama_cpp_worker::config::WorkerConfig;
use llama_cpp_worker::logger::setup_logging;
use llama_cpp_worker::worker::run_worker;

fn main() -> ExitCode {
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load worker config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let logging = setup_logging(&config.logging);
    if let Err(e) = &logging {
        eprintln!("Failed to set up logging: {e}");
    }

    match run_worker(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if logging.is_ok() {
                error!("{e:#}");
            } else {
                eprintln!("{e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
