use anyhow::Result;
use clap::Parser;

use tlweave::cli::{Cli, Commands};
use tlweave::config::{self, Config};
use tlweave::{logging, translate};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Translate(args) => {
            let mut cfg = Config::load().unwrap_or_default();
            translate::apply_overrides(&mut cfg, args);
            Some(translate::log_path(&translate::resolve_output(args, &cfg)))
        }
        _ => None,
    };
    logging::init(log_file.as_deref())?;

    match cli.command {
        Commands::Translate(args) => translate::run(args)?,
        Commands::Status(args) => translate::status(args)?,
        Commands::TestApi(args) => translate::test_api(args)?,
        Commands::Config(args) => config::commands::run(args)?,
    }

    Ok(())
}
