//! Dense 32³ block storage.

use crate::block::{BlockType, VoxelError};
use crate::coords::LocalPos;

/// Voxels along each chunk axis.
pub const CHUNK_SIZE: usize = 32;

/// Voxels in one chunk.
pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

/// A 32×32×32 block array, one byte per voxel.
///
/// Layout is x-fastest, then z, then y: `index = (y * 32 + z) * 32 + x`.
/// The same layout is used for the raw byte form sent in chunk data.
#[derive(Clone, PartialEq, Eq)]
pub struct VoxelGrid {
    blocks: Box<[BlockType]>,
}

impl VoxelGrid {
    /// Creates a grid filled with air.
    pub fn new() -> Self {
        Self::filled(BlockType::Air)
    }

    pub fn filled(block: BlockType) -> Self {
        Self {
            blocks: vec![block; CHUNK_VOLUME].into_boxed_slice(),
        }
    }

    #[inline]
    fn index(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < CHUNK_SIZE && y < CHUNK_SIZE && z < CHUNK_SIZE);
        (y * CHUNK_SIZE + z) * CHUNK_SIZE + x
    }

    /// Block at local `(x, y, z)`. Out-of-range coordinates read as air.
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockType {
        if x >= CHUNK_SIZE || y >= CHUNK_SIZE || z >= CHUNK_SIZE {
            return BlockType::Air;
        }
        self.blocks[Self::index(x, y, z)]
    }

    pub fn get_local(&self, pos: LocalPos) -> BlockType {
        self.get(pos.x, pos.y, pos.z)
    }

    /// Writes a block and returns the previous value.
    ///
    /// Out-of-range writes are ignored and return `None`.
    pub fn set(&mut self, x: usize, y: usize, z: usize, block: BlockType) -> Option<BlockType> {
        if x >= CHUNK_SIZE || y >= CHUNK_SIZE || z >= CHUNK_SIZE {
            tracing::warn!("VoxelGrid::set out of bounds: ({x}, {y}, {z})");
            return None;
        }
        let slot = &mut self.blocks[Self::index(x, y, z)];
        Some(std::mem::replace(slot, block))
    }

    pub fn set_local(&mut self, pos: LocalPos, block: BlockType) -> Option<BlockType> {
        self.set(pos.x, pos.y, pos.z, block)
    }

    /// Fills the whole grid with one block type.
    pub fn fill(&mut self, block: BlockType) {
        self.blocks.fill(block);
    }

    /// Returns `true` if every voxel is air.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.is_air())
    }

    /// Number of non-air voxels.
    pub fn non_air_count(&self) -> usize {
        self.blocks.iter().filter(|b| !b.is_air()).count()
    }

    /// Raw one-byte-per-voxel view, `CHUNK_VOLUME` bytes long.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.blocks)
    }

    /// Rebuilds a grid from its raw byte form, validating every block id.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VoxelError> {
        if bytes.len() != CHUNK_VOLUME {
            return Err(VoxelError::GridSize {
                expected: CHUNK_VOLUME,
                actual: bytes.len(),
            });
        }
        match bytemuck::checked::try_cast_slice::<u8, BlockType>(bytes) {
            Ok(blocks) => Ok(Self {
                blocks: blocks.into(),
            }),
            Err(_) => {
                // Report the first offending byte rather than the cast error.
                let bad = bytes
                    .iter()
                    .copied()
                    .find(|b| BlockType::try_from(*b).is_err())
                    .unwrap_or(u8::MAX);
                Err(VoxelError::UnknownBlockId(bad))
            }
        }
    }
}

impl Default for VoxelGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VoxelGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelGrid")
            .field("non_air", &self.non_air_count())
            .finish()
    }
}
