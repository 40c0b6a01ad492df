//! APM CLI Binary
//!
//! Command-line entry point for the Agent Package Manager.

use apm::logging::{init_logging, LoggingConfig};
use apm::tooling::cli::{Cli, CliContext};
use clap::Parser;
use std::process;

fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default();
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        logging.format = format.clone();
    }
    if let Some(output) = &cli.log_output {
        logging.output = output.clone();
    }
    logging.file = cli.log_file.clone();
    if let Err(e) = init_logging(&logging) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    let context = CliContext::new(cli.workspace.clone());
    match context.execute(&cli.command) {
        Ok(result) => {
            if !result.output.is_empty() {
                println!("{}", result.output);
            }
            process::exit(result.exit_code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}
