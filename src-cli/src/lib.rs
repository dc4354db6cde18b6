pub mod cli;
pub mod commands;
pub mod error;
mod headless;
mod render;

use crate::cli::Cli;
use crate::error::{CommandResult, ResultExt};

/// Initialize tracing/logging with the given directives
///
/// Logs go to stderr so stdout stays clean for events.
pub fn init_logging(directives: &[&str]) -> anyhow::Result<()> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        filter = filter.add_directive(directive.parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn log_directives(verbose: u8) -> &'static [&'static str] {
    match verbose {
        0 => &["scout=info", "scout_core=info", "scout_lib=info"],
        1 => &["scout=debug", "scout_core=debug", "scout_lib=debug"],
        _ => &["scout=trace", "scout_core=trace", "scout_lib=trace", "reqwest=debug"],
    }
}

/// Run one command to completion.
pub fn run(cli: Cli) -> CommandResult<()> {
    init_logging(log_directives(cli.verbose)).internal_err()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(commands::dispatch(cli))
}
