//! Typed message catalogue.
//!
//! Each payload struct implements [`WirePayload`], which fixes its type tag
//! and field layout. [`Message`] is the sum of all payloads and is what the
//! server and client handlers match on.

use lattice_voxel::{BlockPos, BlockType, CHUNK_VOLUME, ChunkCoordinate, VoxelError, VoxelGrid};

use crate::protocol::{
    MAX_NAME_LEN, MAX_TEXT_LEN, MessageType, NetworkPacket, PROTOCOL_VERSION, ProtocolError,
    WireReader, WireWriter,
};

/// A payload with a fixed type tag and binary layout.
pub trait WirePayload: Sized {
    const TYPE: MessageType;

    fn encode(&self, w: &mut WireWriter);

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError>;

    /// Encodes into a packet with sequence 0; links stamp the real sequence.
    fn to_packet(&self) -> NetworkPacket {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        NetworkPacket::new(Self::TYPE, w.into_bytes())
    }

    /// Decodes a packet of exactly this type, rejecting trailing bytes.
    fn from_packet(packet: &NetworkPacket) -> Result<Self, ProtocolError> {
        if packet.message_type() != Self::TYPE {
            return Err(ProtocolError::TypeMismatch {
                expected: Self::TYPE,
                actual: packet.message_type(),
            });
        }
        let mut r = WireReader::new(packet.payload());
        let value = Self::decode(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn write_block_pos(w: &mut WireWriter, pos: BlockPos) {
    w.i32(pos.x).i32(pos.y).i32(pos.z);
}

fn read_block_pos(r: &mut WireReader<'_>) -> Result<BlockPos, ProtocolError> {
    Ok(BlockPos::new(r.i32()?, r.i32()?, r.i32()?))
}

fn write_chunk_coord(w: &mut WireWriter, coord: ChunkCoordinate) {
    w.i32(coord.x).i32(coord.y).i32(coord.z);
}

fn read_chunk_coord(r: &mut WireReader<'_>) -> Result<ChunkCoordinate, ProtocolError> {
    Ok(ChunkCoordinate::new(r.i32()?, r.i32()?, r.i32()?))
}

fn read_block_type(r: &mut WireReader<'_>) -> Result<BlockType, ProtocolError> {
    let id = r.u8()?;
    BlockType::try_from(id).map_err(|_| ProtocolError::InvalidBlockType(id))
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// First message a client sends.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientHello {
    pub protocol_version: u32,
    pub player_name: String,
}

impl ClientHello {
    /// Hello for the current protocol version.
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            player_name: player_name.into(),
        }
    }
}

impl WirePayload for ClientHello {
    const TYPE: MessageType = MessageType::ClientHello;

    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.protocol_version).str(&self.player_name, MAX_NAME_LEN);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            protocol_version: r.u32()?,
            player_name: r.str(MAX_NAME_LEN)?,
        })
    }
}

/// Server's answer to [`ClientHello`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServerHello {
    pub accepted: bool,
    /// Assigned player id; 0 when rejected.
    pub player_id: u32,
    pub spawn: [f32; 3],
    /// Rejection reason; empty when accepted.
    pub reason: String,
}

impl ServerHello {
    pub fn accept(player_id: u32, spawn: [f32; 3]) -> Self {
        Self {
            accepted: true,
            player_id,
            spawn,
            reason: String::new(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            player_id: 0,
            spawn: [0.0; 3],
            reason: reason.into(),
        }
    }
}

impl WirePayload for ServerHello {
    const TYPE: MessageType = MessageType::ServerHello;

    fn encode(&self, w: &mut WireWriter) {
        w.bool(self.accepted)
            .u32(self.player_id)
            .vec3(self.spawn)
            .str(&self.reason, MAX_TEXT_LEN);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            accepted: r.bool()?,
            player_id: r.u32()?,
            spawn: r.vec3()?,
            reason: r.str(MAX_TEXT_LEN)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Player lifecycle and movement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerJoin {
    pub player_id: u32,
    pub name: String,
    pub position: [f32; 3],
}

impl WirePayload for PlayerJoin {
    const TYPE: MessageType = MessageType::PlayerJoin;

    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.player_id)
            .str(&self.name, MAX_NAME_LEN)
            .vec3(self.position);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: r.u32()?,
            name: r.str(MAX_NAME_LEN)?,
            position: r.vec3()?,
        })
    }
}

/// A player left. The transport emits one with `player_id == 0` when a
/// connection closes; the game layer resolves the id from the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerLeave {
    pub player_id: u32,
}

impl WirePayload for PlayerLeave {
    const TYPE: MessageType = MessageType::PlayerLeave;

    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.player_id);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: r.u32()?,
        })
    }
}

/// Position and orientation of a player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerTransform {
    pub player_id: u32,
    pub position: [f32; 3],
    pub yaw: f32,
    pub pitch: f32,
}

impl PlayerTransform {
    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.player_id)
            .vec3(self.position)
            .f32(self.yaw)
            .f32(self.pitch);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: r.u32()?,
            position: r.vec3()?,
            yaw: r.f32()?,
            pitch: r.f32()?,
        })
    }
}

/// Client to server: "I moved here".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerMove(pub PlayerTransform);

impl WirePayload for PlayerMove {
    const TYPE: MessageType = MessageType::PlayerMove;

    fn encode(&self, w: &mut WireWriter) {
        self.0.encode(w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        PlayerTransform::decode(r).map(Self)
    }
}

/// Server to clients: "that player is now here".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerUpdate(pub PlayerTransform);

impl WirePayload for PlayerUpdate {
    const TYPE: MessageType = MessageType::PlayerUpdate;

    fn encode(&self, w: &mut WireWriter) {
        self.0.encode(w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        PlayerTransform::decode(r).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlace {
    pub player_id: u32,
    pub pos: BlockPos,
    pub block: BlockType,
}

impl WirePayload for BlockPlace {
    const TYPE: MessageType = MessageType::BlockPlace;

    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.player_id);
        write_block_pos(w, self.pos);
        w.u8(self.block.id());
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: r.u32()?,
            pos: read_block_pos(r)?,
            block: read_block_type(r)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBreak {
    pub player_id: u32,
    pub pos: BlockPos,
}

impl WirePayload for BlockBreak {
    const TYPE: MessageType = MessageType::BlockBreak;

    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.player_id);
        write_block_pos(w, self.pos);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: r.u32()?,
            pos: read_block_pos(r)?,
        })
    }
}

/// Authoritative single-block change broadcast by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockUpdate {
    pub pos: BlockPos,
    pub block: BlockType,
    /// Player responsible for the change; 0 for the server itself.
    pub caused_by: u32,
}

impl WirePayload for BlockUpdate {
    const TYPE: MessageType = MessageType::BlockUpdate;

    fn encode(&self, w: &mut WireWriter) {
        write_block_pos(w, self.pos);
        w.u8(self.block.id()).u32(self.caused_by);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            pos: read_block_pos(r)?,
            block: read_block_type(r)?,
            caused_by: r.u32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub coord: ChunkCoordinate,
}

impl WirePayload for ChunkRequest {
    const TYPE: MessageType = MessageType::ChunkRequest;

    fn encode(&self, w: &mut WireWriter) {
        write_chunk_coord(w, self.coord);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            coord: read_chunk_coord(r)?,
        })
    }
}

/// Chunk contents. `voxels` is `None` for an all-air chunk, which is sent
/// without the 32 KiB voxel block.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    pub coord: ChunkCoordinate,
    pub voxels: Option<VoxelGrid>,
}

impl ChunkData {
    /// Wraps a grid, omitting the voxel block when it is all air.
    pub fn from_grid(coord: ChunkCoordinate, grid: &VoxelGrid) -> Self {
        Self {
            coord,
            voxels: (!grid.is_empty()).then(|| grid.clone()),
        }
    }

    /// The chunk's grid, materialising air for an empty chunk.
    pub fn into_grid(self) -> VoxelGrid {
        self.voxels.unwrap_or_default()
    }
}

impl WirePayload for ChunkData {
    const TYPE: MessageType = MessageType::ChunkData;

    fn encode(&self, w: &mut WireWriter) {
        write_chunk_coord(w, self.coord);
        match &self.voxels {
            Some(grid) => {
                w.bool(true).raw(grid.as_bytes());
            }
            None => {
                w.bool(false);
            }
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let coord = read_chunk_coord(r)?;
        let voxels = if r.bool()? {
            let raw = r.bytes(CHUNK_VOLUME)?;
            let grid = VoxelGrid::from_bytes(raw).map_err(|e| match e {
                VoxelError::UnknownBlockId(id) => ProtocolError::InvalidBlockType(id),
                _ => ProtocolError::Truncated {
                    needed: CHUNK_VOLUME,
                    available: raw.len(),
                },
            })?;
            Some(grid)
        } else {
            None
        };
        Ok(Self { coord, voxels })
    }
}

// ---------------------------------------------------------------------------
// Chat, keepalive, teardown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender; 0 for server announcements.
    pub player_id: u32,
    pub text: String,
}

impl WirePayload for ChatMessage {
    const TYPE: MessageType = MessageType::ChatMessage;

    fn encode(&self, w: &mut WireWriter) {
        w.u32(self.player_id).str(&self.text, MAX_TEXT_LEN);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: r.u32()?,
            text: r.str(MAX_TEXT_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub timestamp_ms: u64,
}

impl WirePayload for Ping {
    const TYPE: MessageType = MessageType::Ping;

    fn encode(&self, w: &mut WireWriter) {
        w.u64(self.timestamp_ms);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            timestamp_ms: r.u64()?,
        })
    }
}

/// Echoes the ping's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub timestamp_ms: u64,
}

impl WirePayload for Pong {
    const TYPE: MessageType = MessageType::Pong;

    fn encode(&self, w: &mut WireWriter) {
        w.u64(self.timestamp_ms);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            timestamp_ms: r.u64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl WirePayload for Disconnect {
    const TYPE: MessageType = MessageType::Disconnect;

    fn encode(&self, w: &mut WireWriter) {
        w.str(&self.reason, MAX_TEXT_LEN);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: r.str(MAX_TEXT_LEN)?,
        })
    }
}

/// Generic error report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
}

impl WirePayload for ErrorMessage {
    const TYPE: MessageType = MessageType::Error;

    fn encode(&self, w: &mut WireWriter) {
        w.u16(self.code).str(&self.message, MAX_TEXT_LEN);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            code: r.u16()?,
            message: r.str(MAX_TEXT_LEN)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Every message the protocol carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    PlayerJoin(PlayerJoin),
    PlayerLeave(PlayerLeave),
    PlayerMove(PlayerMove),
    PlayerUpdate(PlayerUpdate),
    BlockPlace(BlockPlace),
    BlockBreak(BlockBreak),
    BlockUpdate(BlockUpdate),
    ChunkRequest(ChunkRequest),
    ChunkData(ChunkData),
    ChatMessage(ChatMessage),
    Ping(Ping),
    Pong(Pong),
    Disconnect(Disconnect),
    Error(ErrorMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ClientHello(_) => MessageType::ClientHello,
            Message::ServerHello(_) => MessageType::ServerHello,
            Message::PlayerJoin(_) => MessageType::PlayerJoin,
            Message::PlayerLeave(_) => MessageType::PlayerLeave,
            Message::PlayerMove(_) => MessageType::PlayerMove,
            Message::PlayerUpdate(_) => MessageType::PlayerUpdate,
            Message::BlockPlace(_) => MessageType::BlockPlace,
            Message::BlockBreak(_) => MessageType::BlockBreak,
            Message::BlockUpdate(_) => MessageType::BlockUpdate,
            Message::ChunkRequest(_) => MessageType::ChunkRequest,
            Message::ChunkData(_) => MessageType::ChunkData,
            Message::ChatMessage(_) => MessageType::ChatMessage,
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
            Message::Disconnect(_) => MessageType::Disconnect,
            Message::Error(_) => MessageType::Error,
        }
    }

    pub fn to_packet(&self) -> NetworkPacket {
        match self {
            Message::ClientHello(m) => m.to_packet(),
            Message::ServerHello(m) => m.to_packet(),
            Message::PlayerJoin(m) => m.to_packet(),
            Message::PlayerLeave(m) => m.to_packet(),
            Message::PlayerMove(m) => m.to_packet(),
            Message::PlayerUpdate(m) => m.to_packet(),
            Message::BlockPlace(m) => m.to_packet(),
            Message::BlockBreak(m) => m.to_packet(),
            Message::BlockUpdate(m) => m.to_packet(),
            Message::ChunkRequest(m) => m.to_packet(),
            Message::ChunkData(m) => m.to_packet(),
            Message::ChatMessage(m) => m.to_packet(),
            Message::Ping(m) => m.to_packet(),
            Message::Pong(m) => m.to_packet(),
            Message::Disconnect(m) => m.to_packet(),
            Message::Error(m) => m.to_packet(),
        }
    }

    pub fn from_packet(packet: &NetworkPacket) -> Result<Self, ProtocolError> {
        Ok(match packet.message_type() {
            MessageType::ClientHello => Message::ClientHello(ClientHello::from_packet(packet)?),
            MessageType::ServerHello => Message::ServerHello(ServerHello::from_packet(packet)?),
            MessageType::PlayerJoin => Message::PlayerJoin(PlayerJoin::from_packet(packet)?),
            MessageType::PlayerLeave => Message::PlayerLeave(PlayerLeave::from_packet(packet)?),
            MessageType::PlayerMove => Message::PlayerMove(PlayerMove::from_packet(packet)?),
            MessageType::PlayerUpdate => Message::PlayerUpdate(PlayerUpdate::from_packet(packet)?),
            MessageType::BlockPlace => Message::BlockPlace(BlockPlace::from_packet(packet)?),
            MessageType::BlockBreak => Message::BlockBreak(BlockBreak::from_packet(packet)?),
            MessageType::BlockUpdate => Message::BlockUpdate(BlockUpdate::from_packet(packet)?),
            MessageType::ChunkRequest => Message::ChunkRequest(ChunkRequest::from_packet(packet)?),
            MessageType::ChunkData => Message::ChunkData(ChunkData::from_packet(packet)?),
            MessageType::ChatMessage => Message::ChatMessage(ChatMessage::from_packet(packet)?),
            MessageType::Ping => Message::Ping(Ping::from_packet(packet)?),
            MessageType::Pong => Message::Pong(Pong::from_packet(packet)?),
            MessageType::Disconnect => Message::Disconnect(Disconnect::from_packet(packet)?),
            MessageType::Error => Message::Error(ErrorMessage::from_packet(packet)?),
        })
    }

    /// Shorthand for a disconnect notice.
    pub fn disconnect(reason: impl Into<String>) -> Self {
        Message::Disconnect(Disconnect {
            reason: reason.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> PlayerTransform {
        PlayerTransform {
            player_id: 3,
            position: [1.5, 18.0, -4.25],
            yaw: 90.0,
            pitch: -10.0,
        }
    }

    fn sample_grid() -> VoxelGrid {
        let mut grid = VoxelGrid::new();
        grid.set(0, 0, 0, BlockType::Bedrock);
        grid.set(31, 15, 7, BlockType::Grass);
        grid
    }

    /// One instance of every message type.
    fn catalogue() -> Vec<Message> {
        vec![
            Message::ClientHello(ClientHello::new("Alice")),
            Message::ServerHello(ServerHello::accept(1, [0.0, 18.0, 0.0])),
            Message::ServerHello(ServerHello::reject("server full")),
            Message::PlayerJoin(PlayerJoin {
                player_id: 2,
                name: "Bob".into(),
                position: [0.0, 18.0, 0.0],
            }),
            Message::PlayerLeave(PlayerLeave { player_id: 2 }),
            Message::PlayerMove(PlayerMove(transform())),
            Message::PlayerUpdate(PlayerUpdate(transform())),
            Message::BlockPlace(BlockPlace {
                player_id: 1,
                pos: BlockPos::new(-5, 10, 5),
                block: BlockType::Stone,
            }),
            Message::BlockBreak(BlockBreak {
                player_id: 1,
                pos: BlockPos::new(5, 10, 5),
            }),
            Message::BlockUpdate(BlockUpdate {
                pos: BlockPos::new(5, 10, 5),
                block: BlockType::Air,
                caused_by: 1,
            }),
            Message::ChunkRequest(ChunkRequest {
                coord: ChunkCoordinate::new(-1, 0, 2),
            }),
            Message::ChunkData(ChunkData {
                coord: ChunkCoordinate::new(0, 0, 0),
                voxels: Some(sample_grid()),
            }),
            Message::ChunkData(ChunkData {
                coord: ChunkCoordinate::new(0, 3, 0),
                voxels: None,
            }),
            Message::ChatMessage(ChatMessage {
                player_id: 1,
                text: "hi there".into(),
            }),
            Message::Ping(Ping { timestamp_ms: 12_345 }),
            Message::Pong(Pong { timestamp_ms: 12_345 }),
            Message::disconnect("bye"),
            Message::Error(ErrorMessage {
                code: 4,
                message: "bad request".into(),
            }),
        ]
    }

    #[test]
    fn test_every_message_survives_the_wire() {
        for message in catalogue() {
            let bytes = message.to_packet().serialize().unwrap();
            let packet = NetworkPacket::deserialize(bytes).unwrap();
            assert_eq!(packet.message_type(), message.message_type());
            assert_eq!(Message::from_packet(&packet).unwrap(), message);
        }
    }

    #[test]
    fn test_every_truncated_payload_is_rejected() {
        for message in catalogue() {
            let packet = message.to_packet();
            let payload = packet.payload();
            for cut in 0..payload.len() {
                let short = NetworkPacket::new(packet.message_type(), payload[..cut].to_vec());
                assert!(
                    Message::from_packet(&short).is_err(),
                    "{:?} cut to {cut} bytes decoded",
                    packet.message_type()
                );
            }
        }
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut payload = Ping { timestamp_ms: 1 }.to_packet().payload().to_vec();
        payload.push(0);
        let packet = NetworkPacket::new(MessageType::Ping, payload);
        assert_eq!(
            Message::from_packet(&packet),
            Err(ProtocolError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_typed_decode_checks_the_tag() {
        let packet = Ping { timestamp_ms: 1 }.to_packet();
        assert_eq!(
            Pong::from_packet(&packet),
            Err(ProtocolError::TypeMismatch {
                expected: MessageType::Pong,
                actual: MessageType::Ping
            })
        );
    }

    #[test]
    fn test_unknown_block_type_is_rejected() {
        let mut payload = BlockUpdate {
            pos: BlockPos::new(0, 0, 0),
            block: BlockType::Stone,
            caused_by: 0,
        }
        .to_packet()
        .payload()
        .to_vec();
        payload[12] = 200;
        let packet = NetworkPacket::new(MessageType::BlockUpdate, payload);
        assert_eq!(
            Message::from_packet(&packet),
            Err(ProtocolError::InvalidBlockType(200))
        );
    }

    #[test]
    fn test_empty_chunk_omits_voxels() {
        let data = ChunkData::from_grid(ChunkCoordinate::new(0, 5, 0), &VoxelGrid::new());
        assert!(data.voxels.is_none());
        // coord (12) + flag (1)
        assert_eq!(data.to_packet().payload().len(), 13);

        let full = ChunkData::from_grid(ChunkCoordinate::new(0, 0, 0), &sample_grid());
        assert_eq!(full.to_packet().payload().len(), 13 + CHUNK_VOLUME);
        assert_eq!(full.into_grid(), sample_grid());
    }

    #[test]
    fn test_oversized_name_is_clipped_on_encode() {
        let hello = ClientHello::new("x".repeat(100));
        let decoded = ClientHello::from_packet(&hello.to_packet()).unwrap();
        assert_eq!(decoded.player_name.len(), MAX_NAME_LEN);
    }
}
