mod cli;

use std::process::ExitCode;

use clap::Parser as _;

use dronelink_common::logger::*;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_path = Logger::default_path();

    if let Command::Logs(logs) = &args.command {
        return match logs.run(&log_path).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err} ({})", log_path.display());
                ExitCode::FAILURE
            }
        };
    }

    if let Err(err) = Logger::new("dronelink", true, log_path).init() {
        eprintln!("Failed to install logger: {err}");
    }

    let config_path = match args.config_path() {
        Ok(path) => path,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(2);
        }
    };

    let config = match args.load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(2);
        }
    };

    match args.command.handle(config, &config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
