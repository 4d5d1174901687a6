//! The `lattice` binary.

use clap::Parser;
use lattice_app::modes;
use lattice_app::paths::AppPaths;
use lattice_config::{CliArgs, Config, Mode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let paths = AppPaths::resolve(args.config.as_deref())?;
    paths.create_dirs()?;

    let mut config = Config::load_or_create(&paths.config_dir)?;
    config.apply_cli_overrides(&args);
    config.validate()?;

    lattice_log::init_logging(Some(&paths.log_dir), cfg!(debug_assertions), Some(&config));
    tracing::info!(config_dir = %paths.config_dir.display(), "starting lattice");

    let result = match &args.mode {
        Mode::Server { .. } => modes::run_server(&config, &paths),
        Mode::Connect { .. } => modes::run_connect(&config),
        Mode::Singleplayer { .. } => modes::run_singleplayer(&config, &paths),
    };
    if let Err(e) = &result {
        tracing::error!("fatal: {e}");
        eprintln!("lattice: {e}");
    }
    result
}
