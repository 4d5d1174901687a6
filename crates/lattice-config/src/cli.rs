//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::Config;

/// Lattice command-line arguments.
///
/// Options override values loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "lattice", about = "Lattice voxel world server and client")]
pub struct CliArgs {
    #[command(subcommand)]
    pub mode: Mode,

    /// Log filter (error, warn, info, debug, trace, or an EnvFilter directive).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Task scheduler worker threads (0 = one per core).
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Path to config directory (overrides default location).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Run a dedicated server with an operator console on stdin.
    Server {
        /// Interface to bind.
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// World to open or create.
        #[arg(long)]
        world: Option<String>,
        #[arg(long)]
        max_players: Option<usize>,
        /// Seed for a newly created world.
        #[arg(long)]
        seed: Option<u32>,
    },
    /// Connect to a running server.
    Connect {
        /// `HOST:PORT`, or just `HOST` to use the configured port.
        address: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Run an in-process server and join it.
    Singleplayer {
        #[arg(long)]
        world: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(threads) = args.threads {
            self.scheduler.worker_threads = threads;
        }

        match &args.mode {
            Mode::Server {
                bind,
                port,
                world,
                max_players,
                seed,
            } => {
                if let Some(bind) = bind {
                    self.server.bind_address = bind.clone();
                }
                if let Some(port) = port {
                    self.server.port = *port;
                }
                if let Some(world) = world {
                    self.server.world_name = world.clone();
                }
                if let Some(max) = max_players {
                    self.server.max_players = *max;
                }
                if let Some(seed) = seed {
                    self.server.seed = *seed;
                }
            }
            Mode::Connect { address, name } => {
                match address.rsplit_once(':').map(|(h, p)| (h, p.parse::<u16>())) {
                    Some((host, Ok(port))) => {
                        self.client.server_address = host.to_string();
                        self.client.server_port = port;
                    }
                    _ => self.client.server_address = address.clone(),
                }
                if let Some(name) = name {
                    self.client.player_name = name.clone();
                }
            }
            Mode::Singleplayer { world, name } => {
                if let Some(world) = world {
                    self.server.world_name = world.clone();
                }
                if let Some(name) = name {
                    self.client.player_name = name.clone();
                }
            }
        }
    }
}
