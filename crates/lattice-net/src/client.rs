//! Connecting side of the transport.
//!
//! [`GameClient::connect`] opens a socket, performs the hello exchange and
//! then runs a receive thread that decodes packets into a [`MessageQueue`]
//! drained by the game thread. [`GameClient::connect_local`] does the same
//! against an in-process [`NetworkServer`], with packets delivered by
//! callback instead of a receive thread.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lattice_tasks::MessageQueue;
use parking_lot::Mutex;

use crate::connection::{ConnectionId, ConnectionStats, PacketLink, TcpConnection};
use crate::framing::FrameConfig;
use crate::messages::{ClientHello, Message, Ping, WirePayload};
use crate::platform::{SocketConfig, configure_stream};
use crate::protocol::{NetworkPacket, unix_millis};
use crate::server::NetworkServer;

/// Errors surfaced by [`GameClient`] construction.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no server hello within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("server rejected the connection: {reason}")]
    Rejected { reason: String },

    #[error("connection closed during handshake")]
    Disconnected,
}

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on the wait for the server hello. Default: 10s.
    pub handshake_timeout: Duration,
    /// Receive thread idle sleep. Default: 2ms.
    pub poll_interval: Duration,
    pub frame: FrameConfig,
    pub socket: SocketConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(2),
            frame: FrameConfig::default(),
            socket: SocketConfig::default(),
        }
    }
}

/// A handshaken session with a server.
pub struct GameClient {
    link: Arc<dyn PacketLink>,
    incoming: MessageQueue<Message>,
    player_id: u32,
    spawn: [f32; 3],
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

/// Outcome of one inspected message during the handshake.
enum HelloOutcome {
    Accepted { player_id: u32, spawn: [f32; 3] },
    Rejected(String),
}

impl GameClient {
    /// Connects over TCP and blocks until the server answers the hello.
    pub fn connect(addr: SocketAddr, name: &str, config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect_timeout(&addr, config.handshake_timeout)
            .map_err(|source| ClientError::Connect { addr, source })?;
        configure_stream(&stream, &config.socket).map_err(|source| ClientError::Connect { addr, source })?;
        let link: Arc<dyn PacketLink> = Arc::new(
            TcpConnection::new(ConnectionId(0), stream, config.frame)
                .map_err(|source| ClientError::Connect { addr, source })?,
        );

        link.send(ClientHello::new(name).to_packet());

        let incoming = MessageQueue::new();
        let deadline = Instant::now() + config.handshake_timeout;
        let mut early = Vec::new();
        let mut outcome = None;

        while outcome.is_none() {
            for packet in link.receive_available() {
                match decode(&packet) {
                    Some(message) if outcome.is_none() => match hello_outcome(&message) {
                        Some(o) => outcome = Some(o),
                        None => early.push(message),
                    },
                    Some(message) => early.push(message),
                    None => {}
                }
            }
            if outcome.is_some() {
                break;
            }
            if !link.is_connected() {
                return Err(ClientError::Disconnected);
            }
            if Instant::now() >= deadline {
                link.disconnect();
                return Err(ClientError::HandshakeTimeout(config.handshake_timeout));
            }
            std::thread::sleep(config.poll_interval);
        }

        let (player_id, spawn) = match outcome {
            Some(HelloOutcome::Accepted { player_id, spawn }) => (player_id, spawn),
            Some(HelloOutcome::Rejected(reason)) => {
                link.disconnect();
                return Err(ClientError::Rejected { reason });
            }
            None => return Err(ClientError::Disconnected),
        };

        for message in early {
            incoming.push(message);
        }

        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let link = Arc::clone(&link);
            let incoming = incoming.clone();
            let running = Arc::clone(&running);
            let poll = config.poll_interval;
            std::thread::Builder::new()
                .name("lattice-client-recv".into())
                .spawn(move || receive_loop(link.as_ref(), &incoming, &running, poll))
                .map_err(|source| ClientError::Connect { addr, source })?
        };

        tracing::info!(player_id, %addr, "connected to server");
        Ok(Self {
            link,
            incoming,
            player_id,
            spawn,
            running,
            receiver: Mutex::new(Some(handle)),
        })
    }

    /// Joins an in-process server. The same handshake runs over the local link.
    pub fn connect_local(server: &NetworkServer, name: &str, timeout: Duration) -> Result<Self, ClientError> {
        let inbox = Arc::new(LocalInbox::new());
        let sink = Arc::clone(&inbox);
        let server_side = server.attach_local(Arc::new(move |packet: NetworkPacket| {
            if let Some(message) = decode(&packet) {
                sink.deliver(message);
            }
        }));
        let link: Arc<dyn PacketLink> = Arc::new(server_side.client_link());

        link.send(ClientHello::new(name).to_packet());

        let deadline = Instant::now() + timeout;
        let mut early = Vec::new();
        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                link.disconnect();
                return Err(ClientError::HandshakeTimeout(timeout));
            }
            match inbox.next_handshake(remaining) {
                Some(message) => match hello_outcome(&message) {
                    Some(o) => break o,
                    None => early.push(message),
                },
                None => continue,
            }
        };

        let (player_id, spawn) = match outcome {
            HelloOutcome::Accepted { player_id, spawn } => (player_id, spawn),
            HelloOutcome::Rejected(reason) => {
                link.disconnect();
                return Err(ClientError::Rejected { reason });
            }
        };

        inbox.go_live(early);

        tracing::info!(player_id, "joined integrated server");
        Ok(Self {
            link,
            incoming: inbox.incoming.clone(),
            player_id,
            spawn,
            running: Arc::new(AtomicBool::new(true)),
            receiver: Mutex::new(None),
        })
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn spawn_position(&self) -> [f32; 3] {
        self.spawn
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn send(&self, message: &Message) -> bool {
        self.link.send(message.to_packet())
    }

    /// Sends a ping stamped with the current time.
    pub fn ping(&self) -> bool {
        self.send(&Message::Ping(Ping {
            timestamp_ms: unix_millis(),
        }))
    }

    /// Messages received from the server, in arrival order.
    pub fn incoming(&self) -> &MessageQueue<Message> {
        &self.incoming
    }

    pub fn try_receive(&self) -> Option<Message> {
        self.incoming.try_pop()
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Option<Message> {
        self.incoming.pop_with_timeout(timeout)
    }

    pub fn stats(&self) -> ConnectionStats {
        self.link.stats()
    }

    /// Says goodbye if still connected, closes the link and stops the
    /// receive thread. Idempotent.
    pub fn disconnect(&self) {
        if self.link.is_connected() {
            self.send(&Message::disconnect("client quit"));
        }
        self.link.disconnect();
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Receiving end of a local link.
///
/// Until [`LocalInbox::go_live`] runs, deliveries land in a handshake queue
/// that only the connecting thread reads. Going live moves the held-back
/// messages to the public queue under the gate, so a delivery racing the
/// switch cannot overtake them.
struct LocalInbox {
    live: Mutex<bool>,
    handshake: MessageQueue<Message>,
    incoming: MessageQueue<Message>,
}

impl LocalInbox {
    fn new() -> Self {
        Self {
            live: Mutex::new(false),
            handshake: MessageQueue::new(),
            incoming: MessageQueue::new(),
        }
    }

    fn deliver(&self, message: Message) {
        let live = self.live.lock();
        if *live {
            self.incoming.push(message);
        } else {
            self.handshake.push(message);
        }
    }

    fn next_handshake(&self, timeout: Duration) -> Option<Message> {
        self.handshake.pop_with_timeout(timeout)
    }

    /// Publishes `early`, then everything still held, then opens the gate.
    fn go_live(&self, early: Vec<Message>) {
        let mut live = self.live.lock();
        for message in early.into_iter().chain(self.handshake.drain()) {
            self.incoming.push(message);
        }
        *live = true;
    }
}

fn decode(packet: &NetworkPacket) -> Option<Message> {
    match Message::from_packet(packet) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!("dropping undecodable {:?} packet: {e}", packet.message_type());
            None
        }
    }
}

fn hello_outcome(message: &Message) -> Option<HelloOutcome> {
    match message {
        Message::ServerHello(hello) if hello.accepted => Some(HelloOutcome::Accepted {
            player_id: hello.player_id,
            spawn: hello.spawn,
        }),
        Message::ServerHello(hello) => Some(HelloOutcome::Rejected(hello.reason.clone())),
        _ => None,
    }
}

fn receive_loop(link: &dyn PacketLink, incoming: &MessageQueue<Message>, running: &AtomicBool, poll: Duration) {
    while running.load(Ordering::SeqCst) {
        let packets = link.receive_available();
        let idle = packets.is_empty();
        for packet in packets {
            if let Some(message) = decode(&packet) {
                incoming.push(message);
            }
        }
        if !link.is_connected() {
            if running.load(Ordering::SeqCst) {
                incoming.push(Message::disconnect("connection closed"));
            }
            break;
        }
        if idle {
            std::thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ChatMessage, ServerHello};
    use crate::server::{InboundPacket, NetworkServerConfig};
    use lattice_tasks::TaskScheduler;

    fn start_server() -> NetworkServer {
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let config = NetworkServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            poll_interval: Duration::from_millis(2),
            ..Default::default()
        };
        NetworkServer::bind(config, scheduler).unwrap()
    }

    fn pop_inbound(server: &NetworkServer) -> InboundPacket {
        server
            .incoming()
            .pop_with_timeout(Duration::from_secs(5))
            .expect("inbound packet")
    }

    /// Plays the game layer: answers one hello on a helper thread.
    fn answer_hello(server: Arc<NetworkServer>, reply: ServerHello, chatter_first: bool) -> JoinHandle<String> {
        std::thread::spawn(move || {
            let inbound = pop_inbound(&server);
            let Ok(Message::ClientHello(hello)) = Message::from_packet(&inbound.packet) else {
                panic!("expected hello");
            };
            if chatter_first {
                server.send_message(
                    inbound.connection,
                    &Message::ChatMessage(ChatMessage {
                        player_id: 0,
                        text: "welcome".into(),
                    }),
                );
            }
            server.send_message(inbound.connection, &Message::ServerHello(reply));
            hello.player_name
        })
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            handshake_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_handshake_accepts_and_keeps_early_messages() {
        let server = Arc::new(start_server());
        let addr = server.local_addr().unwrap();
        let helper = answer_hello(Arc::clone(&server), ServerHello::accept(1, [0.0, 18.0, 0.0]), true);

        let client = GameClient::connect(addr, "Alice", &fast_config()).unwrap();
        assert_eq!(helper.join().unwrap(), "Alice");
        assert_eq!(client.player_id(), 1);
        assert_eq!(client.spawn_position(), [0.0, 18.0, 0.0]);

        // The chat that arrived before the hello is not lost.
        match client.receive_timeout(Duration::from_secs(1)) {
            Some(Message::ChatMessage(chat)) => assert_eq!(chat.text, "welcome"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_handshake_rejection_carries_reason() {
        let server = Arc::new(start_server());
        let addr = server.local_addr().unwrap();
        let _helper = answer_hello(Arc::clone(&server), ServerHello::reject("name taken"), false);

        match GameClient::connect(addr, "Alice", &fast_config()) {
            Err(ClientError::Rejected { reason }) => assert_eq!(reason, "name taken"),
            other => panic!("unexpected {:?}", other.map(|c| c.player_id())),
        }
    }

    #[test]
    fn test_handshake_times_out_without_answer() {
        let server = start_server();
        let config = ClientConfig {
            handshake_timeout: Duration::from_millis(150),
            ..Default::default()
        };
        let start = Instant::now();
        let result = GameClient::connect(server.local_addr().unwrap(), "Bob", &config);
        assert!(matches!(result, Err(ClientError::HandshakeTimeout(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_connect_refused_is_reported() {
        // Bind then drop to get a port that is very likely closed.
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        assert!(matches!(
            GameClient::connect(addr, "Bob", &fast_config()),
            Err(ClientError::Connect { .. })
        ));
    }

    #[test]
    fn test_server_close_yields_synthetic_disconnect() {
        let server = Arc::new(start_server());
        let addr = server.local_addr().unwrap();
        let helper = answer_hello(Arc::clone(&server), ServerHello::accept(1, [0.0; 3]), false);
        let client = GameClient::connect(addr, "Alice", &fast_config()).unwrap();
        helper.join().unwrap();

        server.disconnect_all();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut saw_disconnect = false;
        while Instant::now() < deadline && !saw_disconnect {
            if let Some(Message::Disconnect(_)) = client.receive_timeout(Duration::from_millis(50)) {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_local_client_handshake() {
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let server = Arc::new(
            NetworkServer::local_only(
                NetworkServerConfig {
                    poll_interval: Duration::from_millis(2),
                    ..Default::default()
                },
                scheduler,
            )
            .unwrap(),
        );
        let helper = answer_hello(Arc::clone(&server), ServerHello::accept(7, [1.0, 2.0, 3.0]), false);

        let client = GameClient::connect_local(&server, "Solo", Duration::from_secs(5)).unwrap();
        assert_eq!(helper.join().unwrap(), "Solo");
        assert_eq!(client.player_id(), 7);

        assert!(client.ping());
        let inbound = pop_inbound(&server);
        assert!(matches!(Message::from_packet(&inbound.packet), Ok(Message::Ping(_))));

        client.disconnect();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_local_inbox_keeps_arrival_order_across_go_live() {
        let chat = |text: &str| {
            Message::ChatMessage(ChatMessage {
                player_id: 0,
                text: text.into(),
            })
        };
        let inbox = LocalInbox::new();
        inbox.deliver(chat("before hello"));
        inbox.deliver(Message::ServerHello(ServerHello::accept(1, [0.0; 3])));
        inbox.deliver(chat("after hello"));

        let mut early = Vec::new();
        loop {
            let message = inbox.next_handshake(Duration::from_secs(1)).unwrap();
            if hello_outcome(&message).is_some() {
                break;
            }
            early.push(message);
        }
        // Arrives while the connecting thread is between the hello and go_live.
        inbox.deliver(chat("racing"));
        assert!(inbox.incoming.is_empty());

        inbox.go_live(early);
        inbox.deliver(chat("live"));

        let order: Vec<String> = inbox
            .incoming
            .drain()
            .into_iter()
            .map(|m| match m {
                Message::ChatMessage(c) => c.text,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(order, ["before hello", "after hello", "racing", "live"]);
        assert!(inbox.handshake.is_empty());
    }
}
