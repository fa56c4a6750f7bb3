use anyhow::Result;
use clap::Parser;
use tracing::error;
use wpt_batch::cli;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args) {
        if cli::logging_started() {
            error!("{:#}", err);
        } else {
            eprintln!("error: {err:#}");
        }
        std::process::exit(1);
    }
    Ok(())
}
