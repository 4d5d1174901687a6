//! The authoritative game server.
//!
//! [`GameServer`] ties the transport to world state. A dedicated tick thread
//! runs at a fixed rate; each tick it
//!
//! 1. drains inbound packets and dispatches them by message type,
//! 2. drains the game event queue, broadcasting block changes,
//! 3. keeps chunks loaded around every player and unloads the rest,
//! 4. starts an asynchronous autosave when the interval has elapsed.
//!
//! Socket clients and in-process clients reach the same handlers; nothing
//! below branches on the transport kind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lattice_net::{
    BlockUpdate, ChatMessage, ChunkData, ConnectionId, Disconnect, ErrorMessage, InboundPacket,
    Message, NetError, NetworkServer, NetworkServerConfig, PROTOCOL_VERSION, PlayerJoin,
    PlayerLeave, PlayerTransform, PlayerUpdate, Pong, ServerHello, WirePayload,
};
use lattice_tasks::{MessageQueue, SchedulerStats, TaskPriority, TaskScheduler};
use lattice_voxel::{BlockPos, BlockType, ChunkCoordinate};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::chunks::{SaveReport, ServerChunkManager, UNLOAD_MARGIN};
use crate::events::{GameEvent, GameEventKind};
use crate::players::{JoinError, PlayerRegistry, PlayerState};
use crate::save::{SaveError, SaveStore, WorldMeta, open_or_create_world, unix_secs};
use crate::terrain::{TerrainGenerator, TerrainParams};
use crate::tick::ServerTickSchedule;

/// Error code sent when a client asks for a chunk outside its range.
pub const ERROR_CHUNK_OUT_OF_RANGE: u16 = 1;

/// Decides whether a player may set a block. Arguments are the player id
/// (0 for the console), the position and the block that would be written
/// (`Air` for a break).
pub type BlockPermission = Arc<dyn Fn(u32, BlockPos, BlockType) -> bool + Send + Sync>;

/// Fatal server start-up errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error("failed to open world: {0}")]
    Save(#[from] SaveError),

    #[error("failed to spawn tick thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Game server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub world_name: String,
    /// Seed used when the world is created; existing worlds keep theirs.
    pub seed: u32,
    pub max_players: usize,
    /// Ticks per second. Default: 20.
    pub tick_rate: u32,
    /// Default: 300s.
    pub autosave_interval: Duration,
    /// Radius, in chunks, kept loaded around each player. Default: 4.
    pub view_distance: i32,
    /// Spawn point for new worlds. Default: `(0, 18, 0)`.
    pub spawn: [f32; 3],
    pub network: NetworkServerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world_name: "world".into(),
            seed: 0,
            max_players: 20,
            tick_rate: 20,
            autosave_interval: Duration::from_secs(300),
            view_distance: 4,
            spawn: [0.0, 18.0, 0.0],
            network: NetworkServerConfig::default(),
        }
    }
}

/// Snapshot of server counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStats {
    pub tick: u64,
    pub players: usize,
    pub connections: usize,
    pub loaded_chunks: usize,
    pub pending_chunks: usize,
    pub dirty_chunks: usize,
    pub scheduler: SchedulerStats,
}

struct ServerState {
    config: ServerConfig,
    network: NetworkServer,
    scheduler: Arc<TaskScheduler>,
    store: Arc<dyn SaveStore>,
    chunks: ServerChunkManager,
    players: Mutex<PlayerRegistry>,
    sessions: Mutex<FxHashMap<ConnectionId, u32>>,
    events: MessageQueue<GameEvent>,
    permission: RwLock<Option<BlockPermission>>,
    meta: Mutex<WorldMeta>,
    running: AtomicBool,
    stopped: AtomicBool,
    stop_requested: AtomicBool,
    saving: AtomicBool,
    last_autosave: Mutex<Instant>,
    tick_count: AtomicU64,
}

/// Authoritative world server.
pub struct GameServer {
    state: Arc<ServerState>,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
}

impl GameServer {
    /// Opens (or creates) the world and binds the listening socket.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SaveStore>,
        scheduler: Arc<TaskScheduler>,
    ) -> Result<Self, ServerError> {
        let network = NetworkServer::bind(config.network.clone(), Arc::clone(&scheduler))?;
        Self::with_network(config, store, scheduler, network)
    }

    /// An in-process server without a listener, for singleplayer.
    /// Clients join through [`GameClient::connect_local`](lattice_net::GameClient::connect_local).
    pub fn integrated(
        config: ServerConfig,
        store: Arc<dyn SaveStore>,
        scheduler: Arc<TaskScheduler>,
    ) -> Result<Self, ServerError> {
        let network = NetworkServer::local_only(config.network.clone(), Arc::clone(&scheduler))?;
        Self::with_network(config, store, scheduler, network)
    }

    fn with_network(
        config: ServerConfig,
        store: Arc<dyn SaveStore>,
        scheduler: Arc<TaskScheduler>,
        network: NetworkServer,
    ) -> Result<Self, ServerError> {
        let meta = open_or_create_world(store.as_ref(), &config.world_name, config.seed, config.spawn)?;
        let generator = TerrainGenerator::new(TerrainParams {
            seed: meta.seed,
            ..Default::default()
        });
        let chunks = ServerChunkManager::new(
            generator,
            Arc::clone(&store),
            meta.name.clone(),
            Arc::clone(&scheduler),
        );

        let state = Arc::new(ServerState {
            players: Mutex::new(PlayerRegistry::new(config.max_players)),
            config,
            network,
            scheduler,
            store,
            chunks,
            sessions: Mutex::new(FxHashMap::default()),
            events: MessageQueue::new(),
            permission: RwLock::new(None),
            meta: Mutex::new(meta),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            saving: AtomicBool::new(false),
            last_autosave: Mutex::new(Instant::now()),
            tick_count: AtomicU64::new(0),
        });

        Ok(Self {
            state,
            tick_thread: Mutex::new(None),
        })
    }

    /// Spawns the tick thread. Calling it again while running does nothing.
    pub fn start(&self) -> Result<(), ServerError> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let state = Arc::clone(&self.state);
        let handle = std::thread::Builder::new()
            .name("lattice-tick".into())
            .spawn(move || state.run_tick_loop())
            .map_err(|e| {
                self.state.running.store(false, Ordering::SeqCst);
                ServerError::ThreadSpawn(e)
            })?;
        *self.tick_thread.lock() = Some(handle);
        tracing::info!(
            world = %self.state.config.world_name,
            tick_rate = self.state.config.tick_rate,
            max_players = self.state.config.max_players,
            "game server started"
        );
        Ok(())
    }

    /// Runs a single tick on the calling thread.
    pub fn tick(&self) {
        self.state.tick();
    }

    /// Stops ticking, saves the world, disconnects everyone and shuts the
    /// transport down. Idempotent.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tick_thread.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        if self.state.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let report = self.state.save_world();
        self.state
            .network
            .broadcast(&Disconnect { reason: "server shutting down".into() }.to_packet());
        self.state.network.shutdown();
        tracing::info!(saved = report.saved, failed = report.failed, "game server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Asks the owner of this server to call [`stop`](Self::stop).
    pub fn request_stop(&self) {
        self.state.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested.load(Ordering::SeqCst)
    }

    pub fn network(&self) -> &NetworkServer {
        &self.state.network
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn chunks(&self) -> &ServerChunkManager {
        &self.state.chunks
    }

    pub fn world_meta(&self) -> WorldMeta {
        self.state.meta.lock().clone()
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.state.scheduler
    }

    // -- Players --------------------------------------------------------------

    /// Registers a player without a connection (console bots, tests).
    pub fn add_player(&self, name: &str) -> Result<u32, JoinError> {
        let spawn = self.state.meta.lock().spawn;
        let id = self.state.players.lock().add_player(name, spawn)?;
        self.state.events.push(GameEvent::now(
            id,
            GameEventKind::PlayerJoined { name: name.to_string() },
        ));
        Ok(id)
    }

    /// Removes a player and closes their connection, if any. Idempotent.
    pub fn remove_player(&self, player_id: u32) -> bool {
        match self.state.connection_of(player_id) {
            Some(connection) => {
                self.state.network.disconnect(connection);
                self.state.end_session(connection)
            }
            None => self.state.remove_player(player_id),
        }
    }

    /// Sends a disconnect notice with `reason` and removes the player.
    pub fn kick(&self, player_id: u32, reason: &str) -> bool {
        if let Some(connection) = self.state.connection_of(player_id) {
            self.state
                .network
                .send_to(connection, Disconnect { reason: reason.to_string() }.to_packet());
        }
        let removed = self.remove_player(player_id);
        if removed {
            tracing::info!(player_id, reason, "player kicked");
        }
        removed
    }

    pub fn players(&self) -> Vec<PlayerState> {
        self.state.players.lock().players()
    }

    pub fn player_count(&self) -> usize {
        self.state.players.lock().len()
    }

    pub fn find_player(&self, name: &str) -> Option<PlayerState> {
        self.state.players.lock().find_by_name(name).cloned()
    }

    // -- World ----------------------------------------------------------------

    /// Installs the block edit permission check.
    pub fn set_permission_callback(&self, permission: BlockPermission) {
        *self.state.permission.write() = Some(permission);
    }

    pub fn clear_permission_callback(&self) {
        *self.state.permission.write() = None;
    }

    /// Places a block. `true` only if permitted and the block changed.
    pub fn place_block(&self, player_id: u32, pos: BlockPos, block: BlockType) -> bool {
        self.state.place_block(player_id, pos, block)
    }

    /// Breaks a block. `true` only if permitted and the block changed.
    pub fn break_block(&self, player_id: u32, pos: BlockPos) -> bool {
        self.state.break_block(player_id, pos)
    }

    pub fn get_block(&self, pos: BlockPos) -> BlockType {
        self.state.chunks.get_block(pos)
    }

    /// Broadcasts a chat line from the server (player id 0).
    pub fn broadcast_chat(&self, text: &str) {
        self.state.network.broadcast(
            &ChatMessage {
                player_id: 0,
                text: text.to_string(),
            }
            .to_packet(),
        );
        self.state
            .events
            .push(GameEvent::now(0, GameEventKind::ChatSent { text: text.to_string() }));
    }

    // -- Persistence ----------------------------------------------------------

    /// Saves dirty chunks and metadata on the calling thread.
    pub fn save_now(&self) -> SaveReport {
        self.state.save_world()
    }

    /// Starts an asynchronous save. Returns `false` if one is already running.
    pub fn trigger_autosave(&self) -> bool {
        self.state.trigger_autosave()
    }

    pub fn is_saving(&self) -> bool {
        self.state.saving.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.state.tick_count.load(Ordering::Relaxed),
            players: self.player_count(),
            connections: self.state.network.connection_count(),
            loaded_chunks: self.state.chunks.loaded_count(),
            pending_chunks: self.state.chunks.pending_count(),
            dirty_chunks: self.state.chunks.dirty_count(),
            scheduler: self.state.scheduler.stats(),
        }
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ServerState {
    fn run_tick_loop(self: Arc<Self>) {
        let mut schedule = ServerTickSchedule::with_tick_rate(self.config.tick_rate);
        let mut last = Instant::now();
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            let due = schedule.accumulate(now.duration_since(last).as_secs_f64());
            last = now;
            for _ in 0..due {
                self.tick();
            }
            std::thread::sleep(schedule.until_next_tick().max(Duration::from_millis(1)));
        }
        tracing::debug!(ticks = schedule.total_ticks(), "tick loop exited");
    }

    fn tick(self: &Arc<Self>) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        for inbound in self.network.incoming().drain() {
            self.handle_inbound(inbound);
        }

        self.process_events();

        let positions = self.players.lock().positions();
        self.chunks.update_interest(&positions, self.config.view_distance);

        if self.last_autosave.lock().elapsed() >= self.config.autosave_interval {
            self.trigger_autosave();
        }
    }

    fn process_events(&self) {
        for event in self.events.drain() {
            if let Some((pos, block)) = event.block_change() {
                self.network.broadcast(
                    &BlockUpdate {
                        pos,
                        block,
                        caused_by: event.player_id,
                    }
                    .to_packet(),
                );
            }
            match &event.kind {
                GameEventKind::PlayerJoined { name } => {
                    tracing::info!(player_id = event.player_id, "{name} joined the game");
                }
                GameEventKind::PlayerLeft { name } => {
                    tracing::info!(player_id = event.player_id, "{name} left the game");
                }
                GameEventKind::ChatSent { text } => {
                    tracing::info!(player_id = event.player_id, "<chat> {text}");
                }
                GameEventKind::PlayerMoved { position, .. } => {
                    tracing::trace!(player_id = event.player_id, ?position, "player moved");
                }
                GameEventKind::BlockPlaced { pos, block } => {
                    tracing::debug!(player_id = event.player_id, %pos, %block, "block placed");
                }
                GameEventKind::BlockBroken { pos } => {
                    tracing::debug!(player_id = event.player_id, %pos, "block broken");
                }
            }
        }
    }

    // -- Message dispatch -----------------------------------------------------

    fn handle_inbound(self: &Arc<Self>, inbound: InboundPacket) {
        let connection = inbound.connection;
        let message = match Message::from_packet(&inbound.packet) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%connection, "dropping malformed packet: {e}");
                return;
            }
        };

        if let Message::ClientHello(hello) = &message {
            self.handle_hello(connection, hello.protocol_version, &hello.player_name);
            return;
        }

        let session = self.sessions.lock().get(&connection).copied();
        let Some(player_id) = session else {
            match message {
                Message::Disconnect(_) => self.network.disconnect(connection),
                Message::PlayerLeave(_) => {}
                other => {
                    tracing::debug!(%connection, kind = ?other.message_type(), "ignoring message before handshake");
                }
            }
            return;
        };

        match message {
            Message::PlayerMove(moved) => self.handle_move(connection, player_id, moved.0),
            Message::BlockPlace(place) => {
                if !self.place_block(player_id, place.pos, place.block) {
                    self.send_correction(connection, place.pos);
                }
            }
            Message::BlockBreak(brk) => {
                if !self.break_block(player_id, brk.pos) {
                    self.send_correction(connection, brk.pos);
                }
            }
            Message::ChunkRequest(request) => self.handle_chunk_request(connection, player_id, request.coord),
            Message::ChatMessage(chat) => self.handle_chat(player_id, chat.text),
            Message::Ping(ping) => {
                self.network.send_to(
                    connection,
                    Pong {
                        timestamp_ms: ping.timestamp_ms,
                    }
                    .to_packet(),
                );
            }
            Message::Disconnect(notice) => {
                tracing::debug!(player_id, reason = %notice.reason, "client disconnecting");
                self.network.disconnect(connection);
                self.end_session(connection);
            }
            Message::PlayerLeave(_) => {
                self.end_session(connection);
            }
            Message::Error(error) => {
                tracing::warn!(player_id, code = error.code, "client reported error: {}", error.message);
            }
            other => {
                tracing::debug!(player_id, kind = ?other.message_type(), "ignoring unexpected message");
            }
        }
    }

    fn handle_hello(&self, connection: ConnectionId, version: u32, name: &str) {
        if self.sessions.lock().contains_key(&connection) {
            tracing::warn!(%connection, "duplicate hello ignored");
            return;
        }

        let spawn = self.meta.lock().spawn;
        let result = if version != PROTOCOL_VERSION {
            Err(format!(
                "protocol version mismatch: server {PROTOCOL_VERSION}, client {version}"
            ))
        } else {
            self.players
                .lock()
                .add_player(name, spawn)
                .map_err(|e| e.to_string())
        };

        let player_id = match result {
            Ok(id) => id,
            Err(reason) => {
                tracing::info!(%connection, name, "join rejected: {reason}");
                self.network.send_to(connection, ServerHello::reject(reason).to_packet());
                self.network.disconnect(connection);
                return;
            }
        };

        self.sessions.lock().insert(connection, player_id);
        self.network
            .send_to(connection, ServerHello::accept(player_id, spawn).to_packet());

        let others: Vec<PlayerJoin> = self
            .players
            .lock()
            .players()
            .into_iter()
            .filter(|p| p.id != player_id)
            .map(|p| PlayerJoin {
                player_id: p.id,
                name: p.name,
                position: p.position,
            })
            .collect();
        for join in others {
            self.network.send_to(connection, join.to_packet());
        }
        self.network.broadcast_except(
            connection,
            &PlayerJoin {
                player_id,
                name: name.to_string(),
                position: spawn,
            }
            .to_packet(),
        );

        self.events.push(GameEvent::now(
            player_id,
            GameEventKind::PlayerJoined { name: name.to_string() },
        ));
    }

    fn handle_move(&self, connection: ConnectionId, player_id: u32, transform: PlayerTransform) {
        let updated = self.players.lock().update_transform(
            player_id,
            transform.position,
            transform.yaw,
            transform.pitch,
        );
        if !updated {
            return;
        }
        let update = PlayerUpdate(PlayerTransform {
            player_id,
            ..transform
        });
        self.network.broadcast_except(connection, &update.to_packet());
        self.events.push(GameEvent::now(
            player_id,
            GameEventKind::PlayerMoved {
                position: transform.position,
                yaw: transform.yaw,
                pitch: transform.pitch,
            },
        ));
    }

    fn handle_chunk_request(self: &Arc<Self>, connection: ConnectionId, player_id: u32, coord: ChunkCoordinate) {
        let position = self.players.lock().get(player_id).map(|p| p.position);
        let in_range = coord.is_within_world()
            && position.is_some_and(|p| {
                ChunkCoordinate::containing(p).horizontal_distance(coord)
                    <= self.config.view_distance.saturating_add(UNLOAD_MARGIN)
            });
        if !in_range {
            self.network.send_to(
                connection,
                ErrorMessage {
                    code: ERROR_CHUNK_OUT_OF_RANGE,
                    message: format!("chunk {coord} is out of range"),
                }
                .to_packet(),
            );
            return;
        }

        let state = Arc::clone(self);
        self.scheduler.submit_detached(
            move || {
                let voxels = state.chunks.load_snapshot(coord);
                state
                    .network
                    .send_to(connection, ChunkData::from_grid(coord, &voxels).to_packet());
            },
            TaskPriority::Normal,
            format!("chunk-send-{}_{}_{}", coord.x, coord.y, coord.z),
        );
    }

    fn handle_chat(&self, player_id: u32, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.network
            .broadcast(&ChatMessage { player_id, text: text.clone() }.to_packet());
        self.events
            .push(GameEvent::now(player_id, GameEventKind::ChatSent { text }));
    }

    /// Tells a client the real state of a block after a rejected edit.
    fn send_correction(&self, connection: ConnectionId, pos: BlockPos) {
        let block = self.chunks.get_block(pos);
        self.network.send_to(
            connection,
            BlockUpdate {
                pos,
                block,
                caused_by: 0,
            }
            .to_packet(),
        );
    }

    // -- Sessions -------------------------------------------------------------

    fn connection_of(&self, player_id: u32) -> Option<ConnectionId> {
        self.sessions
            .lock()
            .iter()
            .find(|(_, id)| **id == player_id)
            .map(|(connection, _)| *connection)
    }

    /// Ends the session bound to `connection`. Returns `true` if a player
    /// was removed.
    fn end_session(&self, connection: ConnectionId) -> bool {
        let player_id = self.sessions.lock().remove(&connection);
        player_id.is_some_and(|id| self.remove_player(id))
    }

    fn remove_player(&self, player_id: u32) -> bool {
        let Some(player) = self.players.lock().remove_player(player_id) else {
            return false;
        };
        self.network.broadcast(&PlayerLeave { player_id }.to_packet());
        self.events
            .push(GameEvent::now(player_id, GameEventKind::PlayerLeft { name: player.name }));
        true
    }

    // -- World mutation -------------------------------------------------------

    fn permitted(&self, player_id: u32, pos: BlockPos, block: BlockType) -> bool {
        match self.permission.read().as_ref() {
            Some(check) => check(player_id, pos, block),
            None => true,
        }
    }

    fn place_block(&self, player_id: u32, pos: BlockPos, block: BlockType) -> bool {
        if block.is_air() {
            tracing::debug!(player_id, %pos, "rejected placement of air");
            return false;
        }
        if !self.permitted(player_id, pos, block) {
            tracing::debug!(player_id, %pos, "block placement denied");
            return false;
        }
        if !self.chunks.set_block(pos, block) {
            return false;
        }
        self.events
            .push(GameEvent::now(player_id, GameEventKind::BlockPlaced { pos, block }));
        true
    }

    fn break_block(&self, player_id: u32, pos: BlockPos) -> bool {
        if !self.permitted(player_id, pos, BlockType::Air) {
            tracing::debug!(player_id, %pos, "block break denied");
            return false;
        }
        if !self.chunks.set_block(pos, BlockType::Air) {
            return false;
        }
        self.events
            .push(GameEvent::now(player_id, GameEventKind::BlockBroken { pos }));
        true
    }

    // -- Persistence ----------------------------------------------------------

    fn save_world(&self) -> SaveReport {
        let report = self.chunks.save_all_dirty();
        let meta = {
            let mut meta = self.meta.lock();
            meta.last_saved_unix_secs = unix_secs();
            meta.tick = self.tick_count.load(Ordering::Relaxed);
            meta.clone()
        };
        if let Err(e) = self.store.save_world_meta(&meta) {
            tracing::error!(world = %meta.name, "failed to save world metadata: {e}");
        }
        tracing::info!(
            world = %meta.name,
            chunks = report.saved,
            failed = report.failed,
            "world saved"
        );
        report
    }

    fn trigger_autosave(self: &Arc<Self>) -> bool {
        *self.last_autosave.lock() = Instant::now();
        if self.saving.swap(true, Ordering::SeqCst) {
            tracing::debug!("autosave already in progress");
            return false;
        }
        let guard = SavingGuard(Arc::clone(self));
        let submitted = self.scheduler.submit_priority(TaskPriority::High, "autosave", move || {
            guard.0.save_world();
        });
        if let Err(e) = submitted {
            tracing::warn!("autosave could not be scheduled: {e}");
            return false;
        }
        true
    }
}

/// Clears `saving` when the autosave task ends, even by panicking, or is
/// dropped unscheduled.
struct SavingGuard(Arc<ServerState>);

impl Drop for SavingGuard {
    fn drop(&mut self) {
        self.0.saving.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::MemorySaveStore;
    use lattice_voxel::VoxelGrid;

    fn integrated_server(max_players: usize) -> (GameServer, Arc<MemorySaveStore>) {
        let store = Arc::new(MemorySaveStore::new());
        let config = ServerConfig {
            world_name: "test".into(),
            max_players,
            ..Default::default()
        };
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let server = GameServer::integrated(config, Arc::clone(&store) as Arc<dyn SaveStore>, scheduler).unwrap();
        (server, store)
    }

    #[test]
    fn test_world_created_on_open() {
        let (server, store) = integrated_server(4);
        assert_eq!(store.list_worlds().unwrap(), vec!["test".to_string()]);
        assert_eq!(server.world_meta().spawn, [0.0, 18.0, 0.0]);
    }

    #[test]
    fn test_add_player_capacity_and_names() {
        let (server, _) = integrated_server(2);
        assert_eq!(server.add_player("alice"), Ok(1));
        assert!(matches!(server.add_player("alice"), Err(JoinError::NameTaken(_))));
        assert_eq!(server.add_player("bob"), Ok(2));
        assert!(matches!(server.add_player("carol"), Err(JoinError::ServerFull { .. })));
        assert!(server.remove_player(1));
        assert!(!server.remove_player(1));
        assert_eq!(server.add_player("carol"), Ok(3));
    }

    #[test]
    fn test_break_and_place_emit_events_only_on_change() {
        let (server, _) = integrated_server(4);
        let pos = BlockPos::new(5, 10, 5);
        assert!(server.get_block(pos).is_solid());
        assert!(server.break_block(1, pos));
        assert!(!server.break_block(1, pos));
        assert_eq!(server.get_block(pos), BlockType::Air);
        assert!(server.place_block(1, pos, BlockType::Wood));
        assert!(!server.place_block(1, pos, BlockType::Wood));
        assert!(!server.place_block(1, pos, BlockType::Air));
        assert_eq!(server.state.events.size(), 2);
    }

    #[test]
    fn test_permission_callback_blocks_edits() {
        let (server, _) = integrated_server(4);
        server.set_permission_callback(Arc::new(|player_id: u32, pos: BlockPos, _: BlockType| {
            player_id == 7 || pos.y > 100
        }));
        let pos = BlockPos::new(5, 10, 5);
        assert!(!server.break_block(1, pos));
        assert!(server.get_block(pos).is_solid());
        assert!(server.state.events.is_empty());
        assert!(server.break_block(7, pos));

        server.clear_permission_callback();
        assert!(server.place_block(1, pos, BlockType::Stone));
    }

    #[test]
    fn test_tick_drains_events() {
        let (server, _) = integrated_server(4);
        server.break_block(0, BlockPos::new(1, 1, 1));
        server.tick();
        assert!(server.state.events.is_empty());
        assert_eq!(server.stats().tick, 1);
    }

    #[test]
    fn test_save_now_persists_edits_and_meta() {
        let (server, store) = integrated_server(4);
        server.place_block(0, BlockPos::new(0, 40, 0), BlockType::Stone);
        assert_eq!(server.save_now().saved, 1);
        assert_eq!(store.chunk_count("test"), 1);
        assert_eq!(server.chunks().dirty_count(), 0);

        server.tick();
        server.save_now();
        assert_eq!(store.load_world_meta("test").unwrap().unwrap().tick, 1);
    }

    #[test]
    fn test_autosave_saves_in_background() {
        let (server, store) = integrated_server(4);
        server.place_block(0, BlockPos::new(0, 40, 0), BlockType::Stone);
        assert!(server.trigger_autosave());
        let deadline = Instant::now() + Duration::from_secs(5);
        while server.is_saving() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!server.is_saving());
        assert_eq!(store.chunk_count("test"), 1);
    }

    /// Store whose metadata writes panic once armed.
    struct PanickingMetaStore {
        inner: MemorySaveStore,
        armed: AtomicBool,
    }

    impl SaveStore for PanickingMetaStore {
        fn create_world(&self, meta: &WorldMeta) -> Result<(), SaveError> {
            self.inner.create_world(meta)
        }

        fn list_worlds(&self) -> Result<Vec<String>, SaveError> {
            self.inner.list_worlds()
        }

        fn save_world_meta(&self, meta: &WorldMeta) -> Result<(), SaveError> {
            if self.armed.load(Ordering::SeqCst) {
                panic!("metadata write exploded");
            }
            self.inner.save_world_meta(meta)
        }

        fn load_world_meta(&self, world: &str) -> Result<Option<WorldMeta>, SaveError> {
            self.inner.load_world_meta(world)
        }

        fn save_chunk(&self, world: &str, coord: ChunkCoordinate, voxels: &VoxelGrid) -> Result<(), SaveError> {
            self.inner.save_chunk(world, coord, voxels)
        }

        fn load_chunk(&self, world: &str, coord: ChunkCoordinate) -> Result<Option<VoxelGrid>, SaveError> {
            self.inner.load_chunk(world, coord)
        }
    }

    #[test]
    fn test_panicking_autosave_does_not_block_later_autosaves() {
        let store = Arc::new(PanickingMetaStore {
            inner: MemorySaveStore::new(),
            armed: AtomicBool::new(false),
        });
        let scheduler = Arc::new(TaskScheduler::new(1).unwrap());
        let server = GameServer::integrated(
            ServerConfig {
                world_name: "fragile".into(),
                ..Default::default()
            },
            Arc::clone(&store) as Arc<dyn SaveStore>,
            Arc::clone(&scheduler),
        )
        .unwrap();

        store.armed.store(true, Ordering::SeqCst);
        assert!(server.trigger_autosave());
        let deadline = Instant::now() + Duration::from_secs(5);
        while (server.is_saving() || scheduler.stats().failed == 0) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(scheduler.stats().failed, 1);
        assert!(!server.is_saving());

        store.armed.store(false, Ordering::SeqCst);
        assert!(server.trigger_autosave());
    }

    #[test]
    fn test_autosave_interval_triggers_from_tick() {
        let store = Arc::new(MemorySaveStore::new());
        let config = ServerConfig {
            world_name: "auto".into(),
            autosave_interval: Duration::ZERO,
            ..Default::default()
        };
        let server = GameServer::integrated(
            config,
            Arc::clone(&store) as Arc<dyn SaveStore>,
            Arc::new(TaskScheduler::new(1).unwrap()),
        )
        .unwrap();
        server.tick();
        let saved_tick = || store.load_world_meta("auto").unwrap().map_or(0, |m| m.tick);
        let deadline = Instant::now() + Duration::from_secs(5);
        while saved_tick() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(saved_tick(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (server, _) = integrated_server(4);
        server.start().unwrap();
        assert!(server.is_running());
        server.stop();
        server.stop();
        assert!(!server.is_running());
    }
}
