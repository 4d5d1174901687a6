//! Operator console commands.
//!
//! Lines are parsed into a [`ConsoleCommand`] and run against a
//! [`GameServer`]; the result is the text to show the operator. A leading
//! `/` is accepted and ignored.

use lattice_voxel::{BlockPos, BlockType};

use crate::server::GameServer;

const HELP: &[&str] = &[
    "help                      show this list",
    "list                      list connected players",
    "kick <name|id> [reason]   disconnect a player",
    "say <text>                broadcast a chat line",
    "save                      save the world now",
    "stats                     show server counters",
    "getblock <x> <y> <z>      show the block at a position",
    "setblock <x> <y> <z> <b>  set a block (name or id)",
    "stop                      save and shut down",
];

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    List,
    Kick { target: String, reason: Option<String> },
    Say(String),
    Save,
    Stats,
    GetBlock(BlockPos),
    SetBlock(BlockPos, BlockType),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    #[error("unknown command '{0}', try 'help'")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("{0}")]
    InvalidArgument(String),
}

impl ConsoleCommand {
    /// Parses one console line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = parts.collect();

        let command = match name.to_ascii_lowercase().as_str() {
            "help" | "?" => Self::Help,
            "list" | "players" => Self::List,
            "kick" => {
                let Some((target, rest)) = args.split_first() else {
                    return Err(ConsoleError::Usage("kick <name|id> [reason]"));
                };
                let reason = (!rest.is_empty()).then(|| rest.join(" "));
                Self::Kick {
                    target: (*target).to_string(),
                    reason,
                }
            }
            "say" => {
                if args.is_empty() {
                    return Err(ConsoleError::Usage("say <text>"));
                }
                Self::Say(args.join(" "))
            }
            "save" => Self::Save,
            "stats" => Self::Stats,
            "getblock" => match args.as_slice() {
                [x, y, z] => Self::GetBlock(parse_pos(x, y, z)?),
                _ => return Err(ConsoleError::Usage("getblock <x> <y> <z>")),
            },
            "setblock" => match args.as_slice() {
                [x, y, z, block] => {
                    let block = block
                        .parse::<BlockType>()
                        .map_err(|e| ConsoleError::InvalidArgument(e.to_string()))?;
                    Self::SetBlock(parse_pos(x, y, z)?, block)
                }
                _ => return Err(ConsoleError::Usage("setblock <x> <y> <z> <block>")),
            },
            "stop" | "quit" | "exit" => Self::Stop,
            other => return Err(ConsoleError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn parse_pos(x: &str, y: &str, z: &str) -> Result<BlockPos, ConsoleError> {
    let coord = |s: &str| {
        s.parse::<i32>()
            .map_err(|_| ConsoleError::InvalidArgument(format!("'{s}' is not a valid coordinate")))
    };
    Ok(BlockPos::new(coord(x)?, coord(y)?, coord(z)?))
}

/// Parses and runs one line, returning the lines to print.
pub fn execute(server: &GameServer, line: &str) -> Vec<String> {
    match ConsoleCommand::parse(line) {
        Ok(Some(command)) => run(server, command),
        Ok(None) => Vec::new(),
        Err(e) => vec![e.to_string()],
    }
}

/// Runs a parsed command.
pub fn run(server: &GameServer, command: ConsoleCommand) -> Vec<String> {
    match command {
        ConsoleCommand::Help => HELP.iter().map(|s| (*s).to_string()).collect(),
        ConsoleCommand::List => {
            let players = server.players();
            let mut out = vec![format!(
                "{} of {} players online",
                players.len(),
                server.config().max_players
            )];
            out.extend(players.iter().map(|p| {
                format!(
                    "  [{}] {} at ({:.1}, {:.1}, {:.1})",
                    p.id, p.name, p.position[0], p.position[1], p.position[2]
                )
            }));
            out
        }
        ConsoleCommand::Kick { target, reason } => {
            let player = target
                .parse::<u32>()
                .ok()
                .and_then(|id| server.players().into_iter().find(|p| p.id == id))
                .or_else(|| server.find_player(&target));
            match player {
                Some(player) => {
                    let reason = reason.unwrap_or_else(|| "kicked by operator".into());
                    server.kick(player.id, &reason);
                    vec![format!("kicked {} ({reason})", player.name)]
                }
                None => vec![format!("no player '{target}'")],
            }
        }
        ConsoleCommand::Say(text) => {
            server.broadcast_chat(&text);
            vec![format!("[server] {text}")]
        }
        ConsoleCommand::Save => {
            let report = server.save_now();
            vec![format!(
                "saved {} chunks ({} failed)",
                report.saved, report.failed
            )]
        }
        ConsoleCommand::Stats => {
            let stats = server.stats();
            vec![
                format!("tick {}", stats.tick),
                format!("players {} / connections {}", stats.players, stats.connections),
                format!(
                    "chunks loaded {} pending {} dirty {}",
                    stats.loaded_chunks, stats.pending_chunks, stats.dirty_chunks
                ),
                format!(
                    "tasks queued {} running {} completed {} failed {} on {} threads",
                    stats.scheduler.queued,
                    stats.scheduler.running,
                    stats.scheduler.completed,
                    stats.scheduler.failed,
                    stats.scheduler.active_threads
                ),
            ]
        }
        ConsoleCommand::GetBlock(pos) => vec![format!("{pos}: {}", server.get_block(pos))],
        ConsoleCommand::SetBlock(pos, block) => {
            let changed = if block.is_air() {
                server.break_block(0, pos)
            } else {
                server.place_block(0, pos, block)
            };
            if changed {
                vec![format!("{pos} set to {block}")]
            } else {
                vec![format!("{pos} unchanged")]
            }
        }
        ConsoleCommand::Stop => {
            server.request_stop();
            vec!["stopping server".to_string()]
        }
    }
}
