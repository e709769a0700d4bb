use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::analysis::TracingProgress;
use crate::registries::distribution::Distribution;
use crate::utils::handle_analysis;

mod analysis;
mod cli;
mod reference;
mod registries;
mod report;
mod utils;
mod version;

fn main() -> ExitCode {
    // Needs to be initialised so that ureq can use rustls and not be dependendant
    // on openssl. This makes building for musl a lot easier.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");
    let cli = cli::Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if cli.debug { "debug" } else { "info" }));
    let custom_format = fmt::format()
        .with_target(false)
        .with_file(true)
        .with_level(true)
        .with_line_number(true)
        .compact();
    // Logs and progress notices go to stderr, stdout stays free for data.
    let fmt_layer = fmt::layer().event_format(custom_format).with_writer(std::io::stderr);
    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();

    let client = Distribution::new(Duration::from_secs(cli.timeout), cli.token.clone(), cli.insecure);
    match handle_analysis(&cli, &client, &TracingProgress) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
