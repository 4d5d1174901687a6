//! World and chunk coordinate spaces.
//!
//! World block positions are unbounded `i32` triples. A [`ChunkCoordinate`]
//! addresses one 32³ volume; a [`LocalPos`] addresses a voxel inside it.
//! Conversion uses floor division, so `-1` maps to chunk `-1`, local `31`.

use serde::{Deserialize, Serialize};

use crate::grid::CHUNK_SIZE;

const CHUNK_SIZE_I32: i32 = CHUNK_SIZE as i32;

/// Splits one world axis value into `(chunk, local)` with `0 <= local < 32`.
pub fn world_to_chunk_and_local(w: i32) -> (i32, usize) {
    (
        w.div_euclid(CHUNK_SIZE_I32),
        w.rem_euclid(CHUNK_SIZE_I32) as usize,
    )
}

/// Identifies a chunk on the integer chunk grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoordinate {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Neighbouring chunk offset by `(dx, dy, dz)`.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// The six face-adjacent neighbours (-X, +X, -Y, +Y, -Z, +Z).
    pub fn face_neighbors(self) -> [ChunkCoordinate; 6] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
        ]
    }

    /// World position of this chunk's minimum corner voxel.
    pub fn origin(self) -> BlockPos {
        BlockPos::new(
            self.x * CHUNK_SIZE_I32,
            self.y * CHUNK_SIZE_I32,
            self.z * CHUNK_SIZE_I32,
        )
    }

    /// Chunk containing a continuous world position (e.g. a player's feet).
    pub fn containing(position: [f32; 3]) -> Self {
        BlockPos::from_world(position).chunk()
    }

    /// Smallest chunk coordinate on any axis: the chunk holding `i32::MIN`.
    pub const MIN_AXIS: i32 = i32::MIN / CHUNK_SIZE_I32;
    /// Largest chunk coordinate on any axis: the chunk holding `i32::MAX`.
    pub const MAX_AXIS: i32 = i32::MAX / CHUNK_SIZE_I32;

    /// `true` if every voxel of this chunk has an `i32` block position.
    pub fn is_within_world(self) -> bool {
        [self.x, self.y, self.z]
            .into_iter()
            .all(|v| (Self::MIN_AXIS..=Self::MAX_AXIS).contains(&v))
    }

    /// Chebyshev distance on the horizontal plane, saturating at `i32::MAX`.
    pub fn horizontal_distance(self, other: ChunkCoordinate) -> i32 {
        let d = self.x.abs_diff(other.x).max(self.z.abs_diff(other.z));
        i32::try_from(d).unwrap_or(i32::MAX)
    }

    /// Vertical distance in chunk layers, saturating at `i32::MAX`.
    pub fn vertical_distance(self, other: ChunkCoordinate) -> i32 {
        i32::try_from(self.y.abs_diff(other.y)).unwrap_or(i32::MAX)
    }
}

impl std::fmt::Display for ChunkCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Voxel position inside a chunk, each axis in `[0, 32)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalPos {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl LocalPos {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Returns `true` if any axis lies on a chunk face (0 or 31).
    pub fn is_on_boundary(self) -> bool {
        [self.x, self.y, self.z]
            .into_iter()
            .any(|v| v == 0 || v == CHUNK_SIZE - 1)
    }
}

/// Absolute block position in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Block containing a continuous world position.
    pub fn from_world(position: [f32; 3]) -> Self {
        Self {
            x: position[0].floor() as i32,
            y: position[1].floor() as i32,
            z: position[2].floor() as i32,
        }
    }

    /// Splits this position into its chunk and the voxel within it.
    pub fn to_chunk_local(self) -> (ChunkCoordinate, LocalPos) {
        let (cx, lx) = world_to_chunk_and_local(self.x);
        let (cy, ly) = world_to_chunk_and_local(self.y);
        let (cz, lz) = world_to_chunk_and_local(self.z);
        (ChunkCoordinate::new(cx, cy, cz), LocalPos::new(lx, ly, lz))
    }

    pub fn chunk(self) -> ChunkCoordinate {
        self.to_chunk_local().0
    }

    /// Reassembles a world position from chunk and local parts.
    pub fn from_chunk_local(chunk: ChunkCoordinate, local: LocalPos) -> Self {
        let origin = chunk.origin();
        Self {
            x: origin.x + local.x as i32,
            y: origin.y + local.y as i32,
            z: origin.z + local.z as i32,
        }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
