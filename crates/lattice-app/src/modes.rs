//! The three ways to run the binary.

use std::error::Error;
use std::io::BufRead;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_config::Config;
use lattice_net::{ChatMessage, ClientConfig, FrameConfig, GameClient, Message, NetworkServerConfig};
use lattice_server::{DirectorySaveStore, GameServer, SaveStore, ServerConfig, console};
use lattice_tasks::{MessageQueue, TaskScheduler};

use crate::frame_loop::FrameLoop;
use crate::paths::AppPaths;
use crate::session::ClientSession;

type AppResult = Result<(), Box<dyn Error>>;

const CLIENT_FPS: u32 = 60;
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid address {addr}: {source}")]
    Invalid {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} did not resolve to any address")]
    Unresolved(String),
}

/// Resolves `host:port`, taking the first result.
pub fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, AddressError> {
    let display = format!("{host}:{port}");
    let mut addrs = (host, port).to_socket_addrs().map_err(|source| AddressError::Invalid {
        addr: display.clone(),
        source,
    })?;
    addrs.next().ok_or(AddressError::Unresolved(display))
}

/// Maps the file/CLI configuration onto the server's runtime settings.
pub fn server_config(config: &Config) -> Result<ServerConfig, AddressError> {
    let server = &config.server;
    Ok(ServerConfig {
        world_name: server.world_name.clone(),
        seed: server.seed,
        max_players: server.max_players,
        tick_rate: server.tick_rate,
        autosave_interval: Duration::from_secs(server.autosave_interval_secs),
        view_distance: server.view_distance,
        spawn: server.spawn,
        network: NetworkServerConfig {
            bind_addr: resolve_addr(&server.bind_address, server.port)?,
            max_connections: server.max_players,
            poll_interval: Duration::from_millis(config.network.poll_interval_ms),
            frame: frame_config(config),
            ..Default::default()
        },
    })
}

pub fn client_config(config: &Config) -> ClientConfig {
    ClientConfig {
        handshake_timeout: Duration::from_secs(config.client.handshake_timeout_secs),
        poll_interval: Duration::from_millis(config.network.poll_interval_ms.max(1)),
        frame: frame_config(config),
        ..Default::default()
    }
}

fn frame_config(config: &Config) -> FrameConfig {
    FrameConfig {
        max_frame_size: config.network.max_frame_size,
    }
}

/// Reads stdin lines on a background thread.
fn spawn_stdin_reader() -> std::io::Result<MessageQueue<String>> {
    let lines = MessageQueue::new();
    let sink = lines.clone();
    std::thread::Builder::new()
        .name("lattice-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => sink.push(line),
                    Err(e) => {
                        tracing::warn!("stdin closed: {e}");
                        break;
                    }
                }
            }
        })?;
    Ok(lines)
}

fn open_store(config: &Config, paths: &AppPaths) -> Arc<dyn SaveStore> {
    let root = config
        .server
        .save_dir
        .clone()
        .unwrap_or_else(|| paths.worlds_dir());
    tracing::info!(path = %root.display(), "world saves");
    Arc::new(DirectorySaveStore::new(root))
}

// --- server ---

/// Dedicated server with an operator console on stdin. Returns after `stop`.
pub fn run_server(config: &Config, paths: &AppPaths) -> AppResult {
    let scheduler = Arc::new(TaskScheduler::new(config.scheduler.worker_threads)?);
    let server = GameServer::new(server_config(config)?, open_store(config, paths), Arc::clone(&scheduler))?;
    server.start()?;
    if let Some(addr) = server.network().local_addr() {
        tracing::info!(%addr, world = %config.server.world_name, "listening");
    }
    println!("server ready, type 'help' for commands");

    let console_lines = spawn_stdin_reader()?;
    let mut last_status = Instant::now();
    while !server.stop_requested() {
        while let Some(line) = console_lines.try_pop() {
            for out in console::execute(&server, &line) {
                println!("{out}");
            }
        }
        if last_status.elapsed() >= STATUS_INTERVAL {
            let stats = server.stats();
            tracing::debug!(
                tick = stats.tick,
                players = stats.players,
                chunks = stats.loaded_chunks,
                "status"
            );
            last_status = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    server.stop();
    scheduler.shutdown();
    Ok(())
}

// --- client ---

/// Connects to a remote server and runs headless frames until disconnected
/// or `/quit` is typed. Other lines are sent as chat.
pub fn run_connect(config: &Config) -> AppResult {
    let addr = resolve_addr(&config.client.server_address, config.client.server_port)?;
    let client = GameClient::connect(addr, &config.client.player_name, &client_config(config))?;
    println!(
        "connected to {addr} as player {} ({})",
        client.player_id(),
        config.client.player_name
    );
    let mut session = ClientSession::new(
        client,
        config.client.render_distance,
        config.client.max_mesh_rebuilds_per_frame,
    );
    let input = spawn_stdin_reader()?;
    drive_session(&mut session, &input, |_| false);
    Ok(())
}

/// In-process server plus a local-link client. Lines starting with `/` go
/// to the server console.
pub fn run_singleplayer(config: &Config, paths: &AppPaths) -> AppResult {
    let scheduler = Arc::new(TaskScheduler::new(config.scheduler.worker_threads)?);
    let server = GameServer::integrated(server_config(config)?, open_store(config, paths), Arc::clone(&scheduler))?;
    server.start()?;

    let timeout = Duration::from_secs(config.client.handshake_timeout_secs);
    let client = GameClient::connect_local(server.network(), &config.client.player_name, timeout)?;
    let mut session = ClientSession::new(
        client,
        config.client.render_distance,
        config.client.max_mesh_rebuilds_per_frame,
    );
    println!("singleplayer world '{}' ready, '/help' for commands", config.server.world_name);

    let input = spawn_stdin_reader()?;
    drive_session(&mut session, &input, |command| {
        for out in console::execute(&server, command) {
            println!("{out}");
        }
        server.stop_requested()
    });

    session.disconnect();
    server.stop();
    scheduler.shutdown();
    Ok(())
}

/// Runs frames until the session ends. `on_command` gets `/` lines other
/// than `/quit` and returns `true` to stop.
fn drive_session(session: &mut ClientSession, input: &MessageQueue<String>, mut on_command: impl FnMut(&str) -> bool) {
    let mut frames = FrameLoop::new(CLIENT_FPS);
    let mut last_status = Instant::now();

    while session.is_connected() {
        let mut quit = false;
        while let Some(line) = input.try_pop() {
            let line = line.trim();
            if line == "/quit" {
                quit = true;
            } else if let Some(command) = line.strip_prefix('/') {
                quit |= on_command(command);
            } else if !line.is_empty() {
                session.client().send(&Message::ChatMessage(ChatMessage {
                    player_id: session.client().player_id(),
                    text: line.to_string(),
                }));
            }
        }
        if quit {
            session.disconnect();
            break;
        }

        frames.run_once(session, |s, dt| s.update(dt), |s| {
            let summary = s.render_frame();
            if summary.flushed.failed > 0 {
                tracing::warn!(failed = summary.flushed.failed, "deferred mesh updates failed");
            }
        });

        if last_status.elapsed() >= STATUS_INTERVAL {
            let cache = session.cache().stats();
            let device = session.device_stats();
            tracing::info!(
                chunks = cache.loaded_chunks,
                meshed = cache.meshed_chunks,
                rebuilds = cache.rebuilds,
                live_buffers = device.live_buffers,
                frames = frames.frame_count(),
                "client status"
            );
            last_status = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_mapping() {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".into();
        config.server.port = 4000;
        config.server.max_players = 3;
        config.network.max_frame_size = 4096;

        let mapped = server_config(&config).unwrap();
        assert_eq!(mapped.network.bind_addr, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(mapped.max_players, 3);
        assert_eq!(mapped.network.max_connections, 3);
        assert_eq!(mapped.network.frame.max_frame_size, 4096);
        assert_eq!(mapped.autosave_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_resolve_ip_literal() {
        let addr = resolve_addr("127.0.0.1", 25565).unwrap();
        assert_eq!(addr.port(), 25565);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_client_config_mapping() {
        let mut config = Config::default();
        config.client.handshake_timeout_secs = 3;
        config.network.poll_interval_ms = 0;
        let mapped = client_config(&config);
        assert_eq!(mapped.handshake_timeout, Duration::from_secs(3));
        assert_eq!(mapped.poll_interval, Duration::from_millis(1));
    }
}
