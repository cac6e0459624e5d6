use caribou::{classify, cli::Command, kmers, Cli, Engine};
use clap::Parser;
use color_eyre::eyre::{eyre, Report, Result};
use log::info;
use std::sync::Arc;

fn main() -> Result<(), Report> {
    // ------------------------------------------------------------------------
    // CLI Setup

    // Parse CLI parameters
    let args = Cli::parse();

    // initialize color_eyre crate for colorized logs
    color_eyre::install()?;

    // Set logging/verbosity level via RUST_LOG
    std::env::set_var("RUST_LOG", args.verbosity.filter());

    // initialize env_logger crate for logging/verbosity level
    env_logger::init();

    let engine = Arc::new(Engine::start(args.threads)?);

    // check which CLI command we're running (kmers, train, classify)
    match args.command {
        Command::Kmers(args) => {
            kmers::extract(&engine, &args)?;
        }
        Command::Train(args) => {
            classify::train(&engine, &args)?;
        }
        Command::Classify(args) => {
            let classification = classify::classify(&engine, &args)?;
            info!(
                "Classified {} sequence(s) of {}.",
                classification.state.resolved_count(),
                classification.metagenome
            );
        }
    }

    // every clone is dropped once the command returns
    Arc::try_unwrap(engine).map_err(|_| eyre!("Compute engine is still in use."))?.shutdown();
    Ok(())
}
