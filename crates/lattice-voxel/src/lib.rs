//! Voxel primitives shared by the server and the client: block types, the
//! fixed-size chunk grid, and world/chunk coordinate mapping.

pub mod block;
pub mod coords;
pub mod grid;

pub use block::{BlockType, VoxelError};
pub use coords::{BlockPos, ChunkCoordinate, LocalPos, world_to_chunk_and_local};
pub use grid::{CHUNK_SIZE, CHUNK_VOLUME, VoxelGrid};
