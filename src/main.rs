use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::HumanDuration;
use log::{debug, error, info, warn};

use check_block_dups::signal::{self, EXIT_CODE_INTERRUPTED};
use check_block_dups::{
    Cli, ScanError, print_summary, scan_and_find, write_json, write_skipped, write_text,
};

fn run(cli: &Cli) -> Result<()> {
    let start_time = Instant::now();
    let config = cli.scan_config().context("Invalid configuration")?;
    debug!("Scan configuration: {:?}", config);

    let handler = match signal::install_handler() {
        Ok(handler) => handler,
        Err(e) => {
            warn!("Ctrl+C handler not installed: {}", e);
            signal::ShutdownHandler::new()
        }
    };

    let show_progress = !cli.quiet;
    let report = scan_and_find(&config, Some(handler.flag()), show_progress)?;
    if handler.is_shutdown_requested() {
        return Err(ScanError::Interrupted.into());
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    if cli.json {
        write_json(&report, &config, &mut out)?;
    } else {
        write_text(&report, &mut out)?;
    }
    out.flush()?;

    if cli.quiet {
        write_skipped(&report, &mut io::stderr())?;
    } else {
        print_summary(&report);
    }
    info!("Completed in {}", HumanDuration(start_time.elapsed()));
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }
    if let Err(e) = check_block_dups::logging::init(cli.verbose, cli.quiet, !cli.no_color) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting check-block-dups v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line arguments: {:?}", cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if matches!(e.downcast_ref::<ScanError>(), Some(ScanError::Interrupted)) => {
            warn!("Scan interrupted, no results printed");
            ExitCode::from(EXIT_CODE_INTERRUPTED as u8)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
