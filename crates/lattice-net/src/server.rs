//! Listening side of the transport.
//!
//! [`NetworkServer`] owns two threads:
//!
//! - the accept thread polls the non-blocking listener, configures each new
//!   socket and registers it under a fresh [`ConnectionId`], closing it
//!   immediately when the server is at capacity;
//! - the network thread, every poll interval, submits one HIGH priority
//!   scheduler task per idle connection. The task drains the link into the
//!   shared [`incoming`](NetworkServer::incoming) queue and, if the peer has
//!   gone away, removes the connection and queues a synthetic `PlayerLeave`.
//!
//! A connection whose previous task is still running is skipped for that
//! round, so at most one task reads a given link and packet order holds.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use lattice_tasks::{MessageQueue, TaskPriority, TaskScheduler};
use parking_lot::Mutex;

use crate::connection::{ConnectionId, ConnectionStats, PacketLink, TcpConnection};
use crate::framing::FrameConfig;
use crate::local::{LocalConnection, PacketCallback};
use crate::messages::{Message, PlayerLeave, WirePayload};
use crate::platform::{SocketConfig, configure_stream, create_listener};
use crate::protocol::NetworkPacket;

/// Errors that abort server start-up.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for [`NetworkServer`].
#[derive(Debug, Clone)]
pub struct NetworkServerConfig {
    /// Address to bind to. Default: `0.0.0.0:25565`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 20.
    pub max_connections: usize,
    /// How often the accept and network threads poll. Default: 5ms.
    pub poll_interval: Duration,
    pub frame: FrameConfig,
    pub socket: SocketConfig,
}

impl Default for NetworkServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 25565)),
            max_connections: 20,
            poll_interval: Duration::from_millis(5),
            frame: FrameConfig::default(),
            socket: SocketConfig::default(),
        }
    }
}

/// A packet received from a connection, or a synthetic close notice.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub connection: ConnectionId,
    pub packet: NetworkPacket,
}

#[derive(Clone)]
struct ConnectionEntry {
    link: Arc<dyn PacketLink>,
    /// Set while a processing task for this link is queued or running.
    busy: Arc<AtomicBool>,
}

struct ServerShared {
    config: NetworkServerConfig,
    scheduler: Arc<TaskScheduler>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    next_id: AtomicU32,
    incoming: MessageQueue<InboundPacket>,
    running: AtomicBool,
}

impl ServerShared {
    fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, link: Arc<dyn PacketLink>) {
        self.connections.insert(
            link.id(),
            ConnectionEntry {
                link,
                busy: Arc::new(AtomicBool::new(false)),
            },
        );
    }

    /// Removes a closed connection and tells the game layer exactly once.
    fn remove_closed(&self, id: ConnectionId) {
        if let Some((_, entry)) = self.connections.remove(&id) {
            entry.link.disconnect();
            tracing::info!(connection = %id, "connection closed");
            self.incoming.push(InboundPacket {
                connection: id,
                packet: PlayerLeave { player_id: 0 }.to_packet(),
            });
        }
    }

    fn accept_loop(&self, listener: std::net::TcpListener) {
        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => self.accept_one(stream, peer),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(self.config.poll_interval);
                }
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    std::thread::sleep(self.config.poll_interval);
                }
            }
        }
    }

    fn accept_one(&self, stream: std::net::TcpStream, peer: SocketAddr) {
        if self.connections.len() >= self.config.max_connections {
            tracing::warn!(%peer, "connection limit reached, rejecting");
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return;
        }
        if let Err(e) = configure_stream(&stream, &self.config.socket) {
            tracing::warn!(%peer, "failed to configure socket: {e}");
            return;
        }
        let id = self.allocate_id();
        match TcpConnection::new(id, stream, self.config.frame) {
            Ok(conn) => {
                tracing::info!(connection = %id, %peer, "accepted connection");
                self.register(Arc::new(conn));
            }
            Err(e) => tracing::warn!(%peer, "failed to wrap socket: {e}"),
        }
    }

    fn network_loop(self: &Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let entries: Vec<(ConnectionId, ConnectionEntry)> = self
                .connections
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect();

            for (id, entry) in entries {
                if entry.busy.swap(true, Ordering::AcqRel) {
                    continue;
                }
                let shared = Arc::clone(self);
                self.scheduler.submit_detached(
                    move || shared.process_connection(id, entry),
                    TaskPriority::High,
                    format!("net-recv-{}", id.0),
                );
            }

            std::thread::sleep(self.config.poll_interval);
        }
    }

    fn process_connection(&self, id: ConnectionId, entry: ConnectionEntry) {
        for packet in entry.link.receive_available() {
            self.incoming.push(InboundPacket {
                connection: id,
                packet,
            });
        }
        if !entry.link.is_connected() {
            self.remove_closed(id);
        }
        entry.busy.store(false, Ordering::Release);
    }
}

/// TCP (and in-process) connection pool feeding one inbound queue.
pub struct NetworkServer {
    shared: Arc<ServerShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Option<SocketAddr>,
}

impl NetworkServer {
    /// Binds the listener and starts the accept and network threads.
    pub fn bind(config: NetworkServerConfig, scheduler: Arc<TaskScheduler>) -> Result<Self, NetError> {
        let addr = config.bind_addr;
        let listener =
            create_listener(addr, &config.socket).map_err(|source| NetError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        tracing::info!("server listening on {local_addr}");
        Self::launch(config, scheduler, Some(listener), Some(local_addr))
    }

    /// Starts without a listener; only [`attach_local`](Self::attach_local)
    /// links are served.
    pub fn local_only(config: NetworkServerConfig, scheduler: Arc<TaskScheduler>) -> Result<Self, NetError> {
        Self::launch(config, scheduler, None, None)
    }

    fn launch(
        config: NetworkServerConfig,
        scheduler: Arc<TaskScheduler>,
        listener: Option<std::net::TcpListener>,
        local_addr: Option<SocketAddr>,
    ) -> Result<Self, NetError> {
        let shared = Arc::new(ServerShared {
            config,
            scheduler,
            connections: DashMap::new(),
            next_id: AtomicU32::new(1),
            incoming: MessageQueue::new(),
            running: AtomicBool::new(true),
        });

        let server = Self {
            shared: Arc::clone(&shared),
            threads: Mutex::new(Vec::new()),
            local_addr,
        };

        if let Some(listener) = listener {
            let accept_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name("lattice-accept".into())
                .spawn(move || accept_shared.accept_loop(listener))?;
            server.threads.lock().push(handle);
        }

        let net_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("lattice-network".into())
            .spawn(move || net_shared.network_loop())?;
        server.threads.lock().push(handle);

        Ok(server)
    }

    /// Bound address, when listening on a socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Queue of packets from every connection, plus close notices.
    pub fn incoming(&self) -> &MessageQueue<InboundPacket> {
        &self.shared.incoming
    }

    /// Registers an in-process client. Packets sent to the returned link's id
    /// are handed to `deliver`.
    pub fn attach_local(&self, deliver: PacketCallback) -> Arc<LocalConnection> {
        let id = self.shared.allocate_id();
        let link = Arc::new(LocalConnection::new(id, deliver));
        self.shared.register(link.clone());
        tracing::info!(connection = %id, "attached local connection");
        link
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.shared.connections.iter().map(|e| *e.key()).collect()
    }

    pub fn connection_stats(&self, id: ConnectionId) -> Option<ConnectionStats> {
        self.shared.connections.get(&id).map(|e| e.link.stats())
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.shared
            .connections
            .get(&id)
            .is_some_and(|e| e.link.is_connected())
    }

    fn link(&self, id: ConnectionId) -> Option<Arc<dyn PacketLink>> {
        self.shared.connections.get(&id).map(|e| Arc::clone(&e.link))
    }

    /// Sends to one connection. Returns `false` if it is unknown or closed.
    pub fn send_to(&self, id: ConnectionId, packet: NetworkPacket) -> bool {
        match self.link(id) {
            Some(link) => link.send(packet),
            None => false,
        }
    }

    pub fn send_message(&self, id: ConnectionId, message: &Message) -> bool {
        self.send_to(id, message.to_packet())
    }

    /// Sends to every connection.
    pub fn broadcast(&self, packet: &NetworkPacket) {
        for link in self.links_except(None) {
            link.send(packet.clone());
        }
    }

    /// Sends to every connection except `excluded`.
    pub fn broadcast_except(&self, excluded: ConnectionId, packet: &NetworkPacket) {
        for link in self.links_except(Some(excluded)) {
            link.send(packet.clone());
        }
    }

    fn links_except(&self, excluded: Option<ConnectionId>) -> Vec<Arc<dyn PacketLink>> {
        // Collect first so no map shard stays locked during socket writes.
        self.shared
            .connections
            .iter()
            .filter(|e| Some(*e.key()) != excluded)
            .map(|e| Arc::clone(&e.value().link))
            .collect()
    }

    /// Closes and forgets one connection. No close notice is queued; the
    /// caller already knows.
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some((_, entry)) = self.shared.connections.remove(&id) {
            entry.link.disconnect();
            tracing::info!(connection = %id, "connection dropped by server");
        }
    }

    pub fn disconnect_all(&self) {
        for id in self.connection_ids() {
            self.disconnect(id);
        }
    }

    /// Stops both threads and closes every connection. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.disconnect_all();
        tracing::info!("network server stopped");
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
