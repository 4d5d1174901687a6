//! Visible-face chunk meshing.
//!
//! One quad per exposed voxel face, no merging. Faces on a chunk boundary
//! ask the caller whether the neighbouring voxel is solid.

use lattice_voxel::{BlockPos, BlockType, CHUNK_SIZE, ChunkCoordinate, LocalPos, VoxelGrid};

/// One of the six axis directions a voxel face can point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceDirection {
    PosX = 0,
    NegX = 1,
    PosY = 2,
    NegY = 3,
    PosZ = 4,
    NegZ = 5,
}

impl FaceDirection {
    pub const ALL: [FaceDirection; 6] = [
        Self::PosX,
        Self::NegX,
        Self::PosY,
        Self::NegY,
        Self::PosZ,
        Self::NegZ,
    ];

    /// Unit step towards the neighbouring voxel.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Self::PosX => (1, 0, 0),
            Self::NegX => (-1, 0, 0),
            Self::PosY => (0, 1, 0),
            Self::NegY => (0, -1, 0),
            Self::PosZ => (0, 0, 1),
            Self::NegZ => (0, 0, -1),
        }
    }

    /// Quad corners relative to the voxel's minimum corner, wound
    /// counter-clockwise seen from outside.
    fn corners(self) -> [[u8; 3]; 4] {
        match self {
            Self::PosX => [[1, 0, 0], [1, 1, 0], [1, 1, 1], [1, 0, 1]],
            Self::NegX => [[0, 0, 1], [0, 1, 1], [0, 1, 0], [0, 0, 0]],
            Self::PosY => [[0, 1, 0], [0, 1, 1], [1, 1, 1], [1, 1, 0]],
            Self::NegY => [[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]],
            Self::PosZ => [[1, 0, 1], [1, 1, 1], [0, 1, 1], [0, 0, 1]],
            Self::NegZ => [[0, 0, 0], [0, 1, 0], [1, 1, 0], [1, 0, 0]],
        }
    }
}

/// Packed 8-byte chunk vertex.
///
/// Layout: position `[u8; 3]` in chunk-local units (0..=32), face direction
/// `u8`, block id `u16`, padding `u16`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ChunkVertex {
    pub position: [u8; 3],
    pub normal: u8,
    pub material: u16,
    pub _pad: u16,
}

static_assertions::assert_eq_size!(ChunkVertex, [u8; 8]);

impl ChunkVertex {
    pub fn new(position: [u8; 3], direction: FaceDirection, block: BlockType) -> Self {
        Self {
            position,
            normal: direction as u8,
            material: u16::from(block.id()),
            _pad: 0,
        }
    }
}

/// Vertex and index data for one chunk, ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMesh {
    pub vertices: Vec<ChunkVertex>,
    pub indices: Vec<u32>,
}

impl ChunkMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn quad_count(&self) -> usize {
        self.indices.len() / 6
    }

    fn push_face(&mut self, local: [u8; 3], direction: FaceDirection, block: BlockType) {
        let base = self.vertices.len() as u32;
        for corner in direction.corners() {
            let position = [
                local[0] + corner[0],
                local[1] + corner[1],
                local[2] + corner[2],
            ];
            self.vertices.push(ChunkVertex::new(position, direction, block));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Whether a face of `block` facing a voxel of type `neighbor` is exposed.
fn exposed(block: BlockType, neighbor: BlockType) -> bool {
    !neighbor.is_solid() && neighbor != block
}

/// Builds the mesh for the chunk at `coord`.
///
/// `neighbor_solid` answers for voxels outside the chunk; a boundary face is
/// emitted unless it returns `true`.
pub fn build_chunk_mesh(
    coord: ChunkCoordinate,
    voxels: &VoxelGrid,
    neighbor_solid: impl Fn(BlockPos) -> bool,
) -> ChunkMesh {
    let mut mesh = ChunkMesh::new();
    if voxels.is_empty() {
        return mesh;
    }
    let size = CHUNK_SIZE as i32;

    for y in 0..CHUNK_SIZE {
        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let block = voxels.get(x, y, z);
                if block.is_air() {
                    continue;
                }
                for direction in FaceDirection::ALL {
                    let (dx, dy, dz) = direction.offset();
                    let (nx, ny, nz) = (x as i32 + dx, y as i32 + dy, z as i32 + dz);
                    let inside = (0..size).contains(&nx) && (0..size).contains(&ny) && (0..size).contains(&nz);
                    let visible = if inside {
                        exposed(block, voxels.get(nx as usize, ny as usize, nz as usize))
                    } else {
                        let world = BlockPos::from_chunk_local(coord, LocalPos::new(x, y, z))
                            .offset(dx, dy, dz);
                        !neighbor_solid(world)
                    };
                    if visible {
                        mesh.push_face([x as u8, y as u8, z as u8], direction, block);
                    }
                }
            }
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: ChunkCoordinate = ChunkCoordinate { x: 0, y: 0, z: 0 };

    #[test]
    fn test_empty_chunk_has_no_faces() {
        let mesh = build_chunk_mesh(ORIGIN, &VoxelGrid::new(), |_| false);
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_single_block_has_six_faces() {
        let mut grid = VoxelGrid::new();
        grid.set(10, 10, 10, BlockType::Stone);
        let mesh = build_chunk_mesh(ORIGIN, &grid, |_| false);
        assert_eq!(mesh.quad_count(), 6);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.vertex_bytes().len(), 24 * 8);
    }

    #[test]
    fn test_adjacent_blocks_cull_shared_faces() {
        let mut grid = VoxelGrid::new();
        grid.set(10, 10, 10, BlockType::Stone);
        grid.set(11, 10, 10, BlockType::Dirt);
        let mesh = build_chunk_mesh(ORIGIN, &grid, |_| false);
        assert_eq!(mesh.quad_count(), 10);
    }

    #[test]
    fn test_boundary_face_consults_neighbor() {
        let mut grid = VoxelGrid::new();
        grid.set(31, 0, 0, BlockType::Stone);
        let open = build_chunk_mesh(ORIGIN, &grid, |_| false);
        let closed = build_chunk_mesh(ORIGIN, &grid, |pos| pos == BlockPos::new(32, 0, 0));
        assert_eq!(open.quad_count(), 6);
        assert_eq!(closed.quad_count(), 5);
    }

    #[test]
    fn test_water_next_to_water_is_culled() {
        let mut grid = VoxelGrid::new();
        grid.set(5, 5, 5, BlockType::Water);
        grid.set(6, 5, 5, BlockType::Water);
        let mesh = build_chunk_mesh(ORIGIN, &grid, |_| false);
        assert_eq!(mesh.quad_count(), 10);
    }

    #[test]
    fn test_vertex_positions_stay_in_range() {
        let grid = VoxelGrid::filled(BlockType::Stone);
        let mesh = build_chunk_mesh(ORIGIN, &grid, |_| false);
        // Only the six outer faces of the cube are visible.
        assert_eq!(mesh.quad_count(), 6 * 32 * 32);
        assert!(mesh.vertices.iter().all(|v| v.position.iter().all(|&c| c <= 32)));
    }
}
