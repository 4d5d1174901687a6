//! In-process link for integrated (singleplayer) mode.
//!
//! The server side is a [`LocalConnection`]: outbound packets are handed to a
//! callback registered by the client, inbound packets wait in an inbox until
//! the server's network loop collects them exactly as it would from a socket.
//! The client side is a [`LocalClientLink`] that pushes into that inbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use lattice_tasks::MessageQueue;

use crate::connection::{ConnectionId, ConnectionStats, PacketLink, StatCounters};
use crate::messages::Message;
use crate::protocol::NetworkPacket;

/// Receives packets delivered over an in-process link.
pub type PacketCallback = Arc<dyn Fn(NetworkPacket) + Send + Sync>;

/// Server-side end of an in-process link.
pub struct LocalConnection {
    id: ConnectionId,
    inbox: MessageQueue<NetworkPacket>,
    deliver: PacketCallback,
    connected: Arc<AtomicBool>,
    next_sequence: AtomicU32,
    counters: StatCounters,
}

impl LocalConnection {
    pub fn new(id: ConnectionId, deliver: PacketCallback) -> Self {
        Self {
            id,
            inbox: MessageQueue::new(),
            deliver,
            connected: Arc::new(AtomicBool::new(true)),
            next_sequence: AtomicU32::new(0),
            counters: StatCounters::default(),
        }
    }

    /// The client-side end, sharing this link's inbox and connected flag.
    pub fn client_link(&self) -> LocalClientLink {
        LocalClientLink {
            id: self.id,
            inbox: self.inbox.clone(),
            connected: Arc::clone(&self.connected),
            next_sequence: AtomicU32::new(0),
            counters: StatCounters::default(),
        }
    }
}

impl PacketLink for LocalConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        "local".to_string()
    }

    fn send(&self, packet: NetworkPacket) -> bool {
        if !self.is_connected() {
            return false;
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let packet = packet.with_sequence(sequence);
        self.counters.record_sent(packet.encoded_len());
        (self.deliver)(packet);
        true
    }

    fn receive_available(&self) -> Vec<NetworkPacket> {
        let packets = self.inbox.drain();
        for packet in &packets {
            self.counters.record_bytes_received(packet.encoded_len());
            self.counters.record_packet_received();
        }
        packets
    }

    /// Closing from the server side tells the client with a synthetic
    /// disconnect, the same notice a socket client produces on EOF.
    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            (self.deliver)(Message::disconnect("connection closed").to_packet());
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }
}

/// Client-side end of an in-process link. Inbound traffic arrives through the
/// callback given to [`LocalConnection::new`], so `receive_available` is empty.
pub struct LocalClientLink {
    id: ConnectionId,
    inbox: MessageQueue<NetworkPacket>,
    connected: Arc<AtomicBool>,
    next_sequence: AtomicU32,
    counters: StatCounters,
}

impl PacketLink for LocalClientLink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        "integrated server".to_string()
    }

    fn send(&self, packet: NetworkPacket) -> bool {
        if !self.is_connected() {
            return false;
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let packet = packet.with_sequence(sequence);
        self.counters.record_sent(packet.encoded_len());
        self.inbox.push(packet);
        true
    }

    fn receive_available(&self) -> Vec<NetworkPacket> {
        Vec::new()
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Ping, WirePayload};
    use crate::protocol::MessageType;
    use parking_lot::Mutex;

    fn recording_link() -> (LocalConnection, Arc<Mutex<Vec<NetworkPacket>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let link = LocalConnection::new(ConnectionId(9), Arc::new(move |p| sink.lock().push(p)));
        (link, seen)
    }

    #[test]
    fn test_server_send_invokes_callback_with_sequence() {
        let (link, seen) = recording_link();
        assert!(link.send(Ping { timestamp_ms: 1 }.to_packet()));
        assert!(link.send(Ping { timestamp_ms: 2 }.to_packet()));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].sequence(), 1);
        assert_eq!(link.stats().packets_sent, 2);
    }

    #[test]
    fn test_client_send_lands_in_server_inbox() {
        let (link, _seen) = recording_link();
        let client = link.client_link();
        assert!(client.send(Ping { timestamp_ms: 5 }.to_packet()));
        let packets = link.receive_available();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].message_type(), MessageType::Ping);
        assert!(link.receive_available().is_empty());
    }

    #[test]
    fn test_server_disconnect_notifies_client_once() {
        let (link, seen) = recording_link();
        let client = link.client_link();
        link.disconnect();
        link.disconnect();
        assert!(!client.is_connected());
        assert!(!link.send(Ping { timestamp_ms: 1 }.to_packet()));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message_type(), MessageType::Disconnect);
    }

    #[test]
    fn test_client_disconnect_is_visible_to_server() {
        let (link, seen) = recording_link();
        let client = link.client_link();
        client.disconnect();
        assert!(!link.is_connected());
        // The server side closing afterwards produces no extra notice.
        link.disconnect();
        assert!(seen.lock().is_empty());
    }
}
