use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Maps the CLI flags to a level: `-q` errors only, default info, `-v` debug,
/// `-vv` and beyond trace.
pub fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Routes `log` macros to a terminal logger on stderr.
pub fn init(verbose: u8, quiet: bool, color: bool) -> anyhow::Result<()> {
    let level = level_for(verbose, quiet);

    let mut builder = ConfigBuilder::new();
    let builder = match builder.set_time_offset_to_local() {
        Ok(builder) => builder,
        // Local offset unknown (e.g. multi-threaded on some platforms), keep UTC.
        Err(builder) => builder,
    };
    let config = builder
        .set_target_level(LevelFilter::Off)
        .set_thread_level(if level >= LevelFilter::Trace {
            LevelFilter::Trace
        } else {
            LevelFilter::Off
        })
        .build();

    let colors = if color { ColorChoice::Auto } else { ColorChoice::Never };
    TermLogger::init(level, config, TerminalMode::Stderr, colors)?;
    log::debug!("Logging initialized at level {level}");
    Ok(())
}
