//! Game events queued by world mutations and drained once per tick.

use lattice_net::unix_millis;
use lattice_voxel::{BlockPos, BlockType};

/// Variant-specific event data.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEventKind {
    PlayerJoined { name: String },
    PlayerLeft { name: String },
    PlayerMoved { position: [f32; 3], yaw: f32, pitch: f32 },
    BlockPlaced { pos: BlockPos, block: BlockType },
    BlockBroken { pos: BlockPos },
    ChatSent { text: String },
}

/// Something that happened in the world, attributed to a player.
/// `player_id` 0 means the server itself (console commands).
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    pub player_id: u32,
    pub timestamp_ms: u64,
    pub kind: GameEventKind,
}

impl GameEvent {
    /// Stamps an event with the current time.
    pub fn now(player_id: u32, kind: GameEventKind) -> Self {
        Self {
            player_id,
            timestamp_ms: unix_millis(),
            kind,
        }
    }

    /// The block change this event describes, if any.
    pub fn block_change(&self) -> Option<(BlockPos, BlockType)> {
        match self.kind {
            GameEventKind::BlockPlaced { pos, block } => Some((pos, block)),
            GameEventKind::BlockBroken { pos } => Some((pos, BlockType::Air)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_change_for_block_events() {
        let pos = BlockPos::new(1, 2, 3);
        let placed = GameEvent::now(1, GameEventKind::BlockPlaced { pos, block: BlockType::Stone });
        let broken = GameEvent::now(1, GameEventKind::BlockBroken { pos });
        assert_eq!(placed.block_change(), Some((pos, BlockType::Stone)));
        assert_eq!(broken.block_change(), Some((pos, BlockType::Air)));
    }

    #[test]
    fn test_non_block_events_have_no_change() {
        let chat = GameEvent::now(2, GameEventKind::ChatSent { text: "hi".into() });
        assert!(chat.block_change().is_none());
        assert!(chat.timestamp_ms > 0);
    }
}
