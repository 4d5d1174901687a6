//! Block type catalogue.

use std::fmt;
use std::str::FromStr;

use bytemuck::{CheckedBitPattern, NoUninit};
use serde::{Deserialize, Serialize};

/// Errors produced when decoding voxel data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoxelError {
    /// A byte did not correspond to any [`BlockType`].
    #[error("unknown block id {0}")]
    UnknownBlockId(u8),

    /// A block name did not correspond to any [`BlockType`].
    #[error("unknown block name '{0}'")]
    UnknownBlockName(String),

    /// A raw voxel buffer had the wrong length.
    #[error("voxel buffer holds {actual} bytes, expected {expected}")]
    GridSize { expected: usize, actual: usize },
}

/// Material stored in one voxel. Encoded on the wire and on disk as one byte.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    NoUninit,
    CheckedBitPattern,
)]
#[repr(u8)]
pub enum BlockType {
    #[default]
    Air = 0,
    Grass = 1,
    Dirt = 2,
    Stone = 3,
    Sand = 4,
    Water = 5,
    Wood = 6,
    Leaves = 7,
    Bedrock = 8,
}

impl BlockType {
    /// Every block type, in id order.
    pub const ALL: [BlockType; 9] = [
        BlockType::Air,
        BlockType::Grass,
        BlockType::Dirt,
        BlockType::Stone,
        BlockType::Sand,
        BlockType::Water,
        BlockType::Wood,
        BlockType::Leaves,
        BlockType::Bedrock,
    ];

    /// Raw byte id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Returns `true` for blocks that occlude neighbouring faces.
    pub fn is_solid(self) -> bool {
        !matches!(self, BlockType::Air | BlockType::Water)
    }

    pub fn is_air(self) -> bool {
        self == BlockType::Air
    }

    /// Lowercase name used by console commands.
    pub fn name(self) -> &'static str {
        match self {
            BlockType::Air => "air",
            BlockType::Grass => "grass",
            BlockType::Dirt => "dirt",
            BlockType::Stone => "stone",
            BlockType::Sand => "sand",
            BlockType::Water => "water",
            BlockType::Wood => "wood",
            BlockType::Leaves => "leaves",
            BlockType::Bedrock => "bedrock",
        }
    }
}

impl TryFrom<u8> for BlockType {
    type Error = VoxelError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        BlockType::ALL
            .get(id as usize)
            .copied()
            .ok_or(VoxelError::UnknownBlockId(id))
    }
}

impl FromStr for BlockType {
    type Err = VoxelError;

    /// Accepts a lowercase name or a numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<u8>() {
            return BlockType::try_from(id);
        }
        BlockType::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| VoxelError::UnknownBlockName(s.to_string()))
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
