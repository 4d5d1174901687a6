//! Wire protocol and TCP transport: packet codec, message catalogue,
//! length-prefixed framing, connection links, and the server/client ends.

pub mod client;
pub mod connection;
pub mod framing;
pub mod local;
pub mod messages;
pub mod platform;
pub mod protocol;
pub mod server;

pub use client::{ClientConfig, ClientError, GameClient};
pub use connection::{ConnectionId, ConnectionStats, PacketLink, TcpConnection};
pub use framing::{FrameConfig, FrameDecoder, FrameError, encode_frame, encode_packet};
pub use local::{LocalClientLink, LocalConnection, PacketCallback};
pub use messages::{
    BlockBreak, BlockPlace, BlockUpdate, ChatMessage, ChunkData, ChunkRequest, ClientHello,
    Disconnect, ErrorMessage, Message, Ping, PlayerJoin, PlayerLeave, PlayerMove,
    PlayerTransform, PlayerUpdate, Pong, ServerHello, WirePayload,
};
pub use platform::SocketConfig;
pub use protocol::{
    MAX_NAME_LEN, MAX_TEXT_LEN, MessageType, NetworkPacket, PROTOCOL_VERSION, PacketHeader,
    ProtocolError, unix_millis,
};
pub use server::{InboundPacket, NetError, NetworkServer, NetworkServerConfig};
