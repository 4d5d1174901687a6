//! One peer link: the [`PacketLink`] trait and its TCP implementation.
//!
//! A link sends whole packets and hands back every complete packet that has
//! arrived since the last call. Handlers above this layer only ever see a
//! `dyn PacketLink`, so a socket and an in-process link behave the same.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::framing::{FrameConfig, FrameDecoder, encode_packet};
use crate::protocol::NetworkPacket;

/// Transport-level identifier for one accepted link. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Counters kept by every link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Frames that arrived intact but held an undecodable packet.
    pub malformed_dropped: u64,
}

/// Lock-free backing store for [`ConnectionStats`].
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    malformed_dropped: AtomicU64,
}

impl StatCounters {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A bidirectional packet link to one peer.
pub trait PacketLink: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;

    /// Sends one packet, stamping the link's next sequence number.
    /// Returns `false` if the link is (or just became) disconnected.
    fn send(&self, packet: NetworkPacket) -> bool;

    /// Every complete packet received since the last call. Never blocks.
    fn receive_available(&self) -> Vec<NetworkPacket>;

    /// Closes the link. Safe to call repeatedly.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn stats(&self) -> ConnectionStats;
}

/// How long a send keeps retrying a full socket buffer before giving up.
const WRITE_STALL_LIMIT: Duration = Duration::from_secs(5);

/// Read chunk size for one `read` call.
const READ_CHUNK: usize = 16 * 1024;

struct ReadState {
    stream: TcpStream,
    decoder: FrameDecoder,
    scratch: Box<[u8]>,
}

/// [`PacketLink`] over a non-blocking TCP stream.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    frame_config: FrameConfig,
    writer: Mutex<TcpStream>,
    reader: Mutex<ReadState>,
    connected: AtomicBool,
    next_sequence: AtomicU32,
    counters: StatCounters,
}

impl TcpConnection {
    /// Wraps a stream that is already configured as non-blocking.
    pub fn new(id: ConnectionId, stream: TcpStream, frame_config: FrameConfig) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        let read_half = stream.try_clone()?;
        Ok(Self {
            id,
            peer,
            frame_config,
            writer: Mutex::new(stream),
            reader: Mutex::new(ReadState {
                stream: read_half,
                decoder: FrameDecoder::new(frame_config),
                scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            }),
            connected: AtomicBool::new(true),
            next_sequence: AtomicU32::new(0),
            counters: StatCounters::default(),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Writes all of `bytes`, retrying partial and would-block writes.
    fn write_all_nonblocking(&self, stream: &mut TcpStream, mut bytes: &[u8]) -> std::io::Result<()> {
        let mut stalled_since: Option<Instant> = None;
        while !bytes.is_empty() {
            match stream.write(bytes) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    bytes = &bytes[n..];
                    stalled_since = None;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let since = *stalled_since.get_or_insert_with(Instant::now);
                    if since.elapsed() > WRITE_STALL_LIMIT {
                        return Err(ErrorKind::TimedOut.into());
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl PacketLink for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn send(&self, packet: NetworkPacket) -> bool {
        if !self.is_connected() {
            return false;
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let packet = packet.with_sequence(sequence);
        let frame = match encode_packet(&packet, &self.frame_config) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection = %self.id, "refusing to send {:?}: {e}", packet.message_type());
                return false;
            }
        };

        let mut stream = self.writer.lock();
        match self.write_all_nonblocking(&mut stream, &frame) {
            Ok(()) => {
                self.counters.record_sent(frame.len());
                true
            }
            Err(e) => {
                drop(stream);
                tracing::debug!(connection = %self.id, "write failed: {e}");
                self.disconnect();
                false
            }
        }
    }

    fn receive_available(&self) -> Vec<NetworkPacket> {
        let mut state = self.reader.lock();
        let ReadState {
            stream,
            decoder,
            scratch,
        } = &mut *state;

        let mut closed = false;
        loop {
            match stream.read(scratch) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    self.counters.record_bytes_received(n);
                    decoder.extend(&scratch[..n]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    if self.is_connected() {
                        tracing::debug!(connection = %self.id, "read failed: {e}");
                    }
                    closed = true;
                    break;
                }
            }
        }

        let mut packets = Vec::new();
        match decoder.decode_available() {
            Ok(frames) => {
                for frame in frames {
                    match NetworkPacket::deserialize(frame) {
                        Ok(packet) => {
                            self.counters.record_packet_received();
                            packets.push(packet);
                        }
                        Err(e) => {
                            self.counters.record_malformed();
                            tracing::warn!(connection = %self.id, "dropping malformed packet: {e}");
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(connection = %self.id, "stream desynchronised: {e}");
                closed = true;
            }
        }

        drop(state);
        if closed {
            self.disconnect();
        }
        packets
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.writer.lock().shutdown(Shutdown::Both);
            tracing::debug!(connection = %self.id, peer = %self.peer, "connection closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
