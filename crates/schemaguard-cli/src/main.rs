//! schemaguard command-line tool
//!
//! Applies migration plan files with pre-flight validation, a single
//! transaction and post-commit verification.

mod commands;
mod config;
mod error;
mod formatter;
mod plan_file;

use clap::Parser;
use config::Args;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = args.format;
    let code = match args.into_config().and_then(|config| commands::run(&config)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter::create_formatter(format).format_error(&e.to_string()));
            e.exit_code()
        }
    };

    std::process::exit(code);
}
