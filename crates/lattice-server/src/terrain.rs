//! Deterministic terrain generation.
//!
//! Column heights come from multi-octave Perlin noise around a fixed surface
//! level. Columns are grass over three layers of dirt over stone; columns at
//! or below sea level get sand and are flooded up to sea level. A single
//! bedrock layer sits at the bottom of chunk layer `y = -2`.

use lattice_voxel::{BlockType, CHUNK_SIZE, ChunkCoordinate, VoxelGrid};
use noise::{NoiseFn, Perlin};

/// Lowest world y that holds a block.
pub const BEDROCK_Y: i32 = -2 * CHUNK_SIZE as i32;

const DIRT_DEPTH: i32 = 3;

/// Parameters for [`TerrainGenerator`].
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    /// Average surface height in blocks.
    pub surface_level: i32,
    /// Largest deviation from `surface_level`.
    pub height_variation: f64,
    /// Water fills empty space at or below this height.
    pub sea_level: i32,
    pub octaves: u32,
    pub base_frequency: f64,
    pub lacunarity: f64,
    pub persistence: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 0,
            surface_level: 16,
            height_variation: 4.0,
            sea_level: 14,
            octaves: 4,
            base_frequency: 0.01,
            lacunarity: 2.0,
            persistence: 0.5,
        }
    }
}

/// Fills chunks with terrain. Cheap to share across worker threads.
pub struct TerrainGenerator {
    noise: Perlin,
    params: TerrainParams,
    max_amplitude: f64,
}

impl TerrainGenerator {
    pub fn new(params: TerrainParams) -> Self {
        let mut max_amplitude = 0.0;
        let mut amp = 1.0;
        for _ in 0..params.octaves {
            max_amplitude += amp;
            amp *= params.persistence;
        }
        Self {
            noise: Perlin::new(params.seed),
            params,
            max_amplitude,
        }
    }

    pub fn with_seed(seed: u32) -> Self {
        Self::new(TerrainParams {
            seed,
            ..Default::default()
        })
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Surface height of the column at world `(x, z)`.
    pub fn surface_height(&self, x: i32, z: i32) -> i32 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = 1.0;
        for _ in 0..self.params.octaves {
            total += self.noise.get([f64::from(x) * frequency, f64::from(z) * frequency]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }
        let normalized = if self.max_amplitude > 0.0 {
            (total / self.max_amplitude).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        self.params.surface_level + (normalized * self.params.height_variation).round() as i32
    }

    /// Block at a world position.
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> BlockType {
        self.column_block(self.surface_height(x, z), y)
    }

    fn column_block(&self, height: i32, y: i32) -> BlockType {
        let sea = self.params.sea_level;
        if y < BEDROCK_Y {
            BlockType::Air
        } else if y == BEDROCK_Y {
            BlockType::Bedrock
        } else if y > height {
            if y <= sea { BlockType::Water } else { BlockType::Air }
        } else if y == height {
            if height <= sea { BlockType::Sand } else { BlockType::Grass }
        } else if y >= height - DIRT_DEPTH {
            if height <= sea { BlockType::Sand } else { BlockType::Dirt }
        } else {
            BlockType::Stone
        }
    }

    /// Generates the full contents of one chunk.
    pub fn generate_chunk(&self, coord: ChunkCoordinate) -> VoxelGrid {
        let mut grid = VoxelGrid::new();
        let origin = coord.origin();
        let top = origin.y + CHUNK_SIZE as i32 - 1;
        let ceiling = self.params.surface_level
            + self.params.height_variation.ceil() as i32
            + 1;
        if top < BEDROCK_Y || origin.y > ceiling.max(self.params.sea_level) {
            return grid;
        }

        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                let height = self.surface_height(origin.x + lx as i32, origin.z + lz as i32);
                for ly in 0..CHUNK_SIZE {
                    let block = self.column_block(height, origin.y + ly as i32);
                    if !block.is_air() {
                        grid.set(lx, ly, lz, block);
                    }
                }
            }
        }
        grid
    }
}

impl Default for TerrainGenerator {
    fn default() -> Self {
        Self::new(TerrainParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let a = TerrainGenerator::with_seed(7);
        let b = TerrainGenerator::with_seed(7);
        let coord = ChunkCoordinate::new(1, 0, -2);
        assert_eq!(a.generate_chunk(coord), b.generate_chunk(coord));
    }

    #[test]
    fn test_heights_stay_within_variation() {
        let terrain = TerrainGenerator::with_seed(3);
        for x in (-200..200).step_by(7) {
            for z in (-200..200).step_by(11) {
                let h = terrain.surface_height(x, z);
                assert!((12..=20).contains(&h), "height {h} at ({x}, {z})");
            }
        }
    }

    #[test]
    fn test_below_surface_is_solid() {
        let terrain = TerrainGenerator::default();
        assert!(terrain.block_at(5, 10, 5).is_solid());
        assert!(terrain.block_at(-40, 0, 17).is_solid());
        assert_eq!(terrain.block_at(0, -20, 0), BlockType::Stone);
    }

    #[test]
    fn test_sky_and_void_chunks_are_empty() {
        let terrain = TerrainGenerator::default();
        assert!(terrain.generate_chunk(ChunkCoordinate::new(0, 2, 0)).is_empty());
        assert!(terrain.generate_chunk(ChunkCoordinate::new(0, -3, 0)).is_empty());
    }

    #[test]
    fn test_bedrock_floor() {
        let terrain = TerrainGenerator::default();
        let grid = terrain.generate_chunk(ChunkCoordinate::new(0, -2, 0));
        assert_eq!(grid.get(0, 0, 0), BlockType::Bedrock);
        assert_eq!(grid.get(31, 0, 31), BlockType::Bedrock);
        assert_eq!(grid.get(4, 1, 4), BlockType::Stone);
    }

    #[test]
    fn test_surface_layering() {
        let terrain = TerrainGenerator::default();
        let sea = terrain.params().sea_level;
        for x in 0..64 {
            let h = terrain.surface_height(x, 0);
            let top = terrain.block_at(x, h, 0);
            if h > sea {
                assert_eq!(top, BlockType::Grass);
                assert_eq!(terrain.block_at(x, h - 1, 0), BlockType::Dirt);
                assert_eq!(terrain.block_at(x, h + 1, 0), BlockType::Air);
            } else {
                assert_eq!(top, BlockType::Sand);
                assert_eq!(terrain.block_at(x, sea, 0).is_air(), false);
            }
            assert_eq!(terrain.block_at(x, h - DIRT_DEPTH - 1, 0), BlockType::Stone);
        }
    }
}
