//! Authoritative chunk storage.
//!
//! [`ServerChunkManager`] owns every loaded [`ServerChunk`] behind one lock.
//! Loads run on the task scheduler: the chunk is read from the save store or
//! generated outside the lock and published into the map only once complete.
//! Block access loads synchronously on demand.

use std::sync::Arc;

use dashmap::DashSet;
use lattice_tasks::{TaskHandle, TaskPriority, TaskScheduler};
use lattice_voxel::{BlockPos, BlockType, ChunkCoordinate, VoxelGrid};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::save::{SaveError, SaveStore};
use crate::terrain::TerrainGenerator;

/// Chunks further than this many chunks beyond the view distance are unloaded.
pub const UNLOAD_MARGIN: i32 = 2;

/// One loaded chunk.
#[derive(Debug, Clone)]
pub struct ServerChunk {
    pub coord: ChunkCoordinate,
    pub voxels: VoxelGrid,
    dirty: bool,
    generated: bool,
    revision: u64,
}

impl ServerChunk {
    fn new(coord: ChunkCoordinate, voxels: VoxelGrid, generated: bool) -> Self {
        Self {
            coord,
            voxels,
            dirty: false,
            generated,
            revision: 0,
        }
    }

    /// Writes one block. Returns `true` and marks the chunk dirty only when
    /// the stored value changed.
    pub fn set_block(&mut self, pos: BlockPos, block: BlockType) -> bool {
        let (_, local) = pos.to_chunk_local();
        match self.voxels.set_local(local, block) {
            Some(previous) if previous != block => {
                self.dirty = true;
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    pub fn get_block(&self, pos: BlockPos) -> BlockType {
        let (_, local) = pos.to_chunk_local();
        self.voxels.get_local(local)
    }

    /// Modified since the last successful save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Produced by the terrain generator rather than read from storage.
    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

/// Outcome of a bulk save.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
}

/// Outcome of an interest update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterestReport {
    pub requested: usize,
    pub unloaded: usize,
}

struct ChunkStore {
    chunks: Mutex<FxHashMap<ChunkCoordinate, ServerChunk>>,
    pending: DashSet<ChunkCoordinate>,
    generator: TerrainGenerator,
    store: Arc<dyn SaveStore>,
    world: String,
}

impl ChunkStore {
    /// Reads a chunk from storage, falling back to generation. Runs without
    /// holding the chunk map lock.
    fn build(&self, coord: ChunkCoordinate) -> ServerChunk {
        match self.store.load_chunk(&self.world, coord) {
            Ok(Some(voxels)) => return ServerChunk::new(coord, voxels, false),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%coord, "failed to load saved chunk, regenerating: {e}");
            }
        }
        ServerChunk::new(coord, self.generator.generate_chunk(coord), true)
    }

    fn publish(&self, chunk: ServerChunk) {
        let coord = chunk.coord;
        self.chunks.lock().entry(coord).or_insert(chunk);
        self.pending.remove(&coord);
    }
}

/// Server-side chunk map.
pub struct ServerChunkManager {
    inner: Arc<ChunkStore>,
    scheduler: Arc<TaskScheduler>,
    vertical_radius: i32,
}

impl ServerChunkManager {
    pub fn new(
        generator: TerrainGenerator,
        store: Arc<dyn SaveStore>,
        world: impl Into<String>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(ChunkStore {
                chunks: Mutex::new(FxHashMap::default()),
                pending: DashSet::new(),
                generator,
                store,
                world: world.into(),
            }),
            scheduler,
            vertical_radius: 1,
        }
    }

    /// Chunk layers kept loaded above and below each player.
    pub fn with_vertical_radius(mut self, radius: i32) -> Self {
        self.vertical_radius = radius.max(0);
        self
    }

    pub fn world(&self) -> &str {
        &self.inner.world
    }

    /// Starts loading `coord` in the background.
    ///
    /// Returns `None` if the chunk is already loaded or a load is in flight.
    /// When the scheduler has shut down the chunk is built on the caller's
    /// thread and `None` is returned.
    pub fn load_chunk(&self, coord: ChunkCoordinate) -> Option<TaskHandle<()>> {
        if !coord.is_within_world() || self.is_loaded(coord) || !self.inner.pending.insert(coord) {
            return None;
        }
        let inner = Arc::clone(&self.inner);
        let submitted = self.scheduler.submit_priority(
            TaskPriority::Normal,
            format!("chunk-load-{}_{}_{}", coord.x, coord.y, coord.z),
            move || {
                let chunk = inner.build(coord);
                inner.publish(chunk);
            },
        );
        match submitted {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::debug!(%coord, "loading chunk inline: {e}");
                self.inner.publish(self.inner.build(coord));
                None
            }
        }
    }

    /// Loads `coord` on the calling thread if it is not loaded yet.
    pub fn ensure_loaded(&self, coord: ChunkCoordinate) {
        if coord.is_within_world() && !self.is_loaded(coord) {
            let chunk = self.inner.build(coord);
            self.inner.chunks.lock().entry(coord).or_insert(chunk);
        }
    }

    /// Persists the chunk if dirty, then evicts it.
    ///
    /// Returns `Ok(false)` if the chunk was not loaded, or if it was modified
    /// again while being saved (it then stays loaded and dirty).
    pub fn unload_chunk(&self, coord: ChunkCoordinate) -> Result<bool, SaveError> {
        let snapshot = {
            let mut chunks = self.inner.chunks.lock();
            let Some(chunk) = chunks.get_mut(&coord) else {
                return Ok(false);
            };
            if !chunk.dirty {
                chunks.remove(&coord);
                return Ok(true);
            }
            chunk.dirty = false;
            (chunk.revision, chunk.voxels.clone())
        };

        let (revision, voxels) = snapshot;
        if let Err(e) = self.inner.store.save_chunk(&self.inner.world, coord, &voxels) {
            if let Some(chunk) = self.inner.chunks.lock().get_mut(&coord) {
                chunk.dirty = true;
            }
            return Err(e);
        }

        let mut chunks = self.inner.chunks.lock();
        match chunks.get(&coord) {
            Some(chunk) if chunk.revision == revision => {
                chunks.remove(&coord);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Writes a block, loading its chunk if needed. Returns `true` if the
    /// stored value changed.
    pub fn set_block(&self, pos: BlockPos, block: BlockType) -> bool {
        let coord = pos.chunk();
        self.ensure_loaded(coord);
        self.inner
            .chunks
            .lock()
            .get_mut(&coord)
            .is_some_and(|chunk| chunk.set_block(pos, block))
    }

    /// Reads a block, loading its chunk if needed.
    pub fn get_block(&self, pos: BlockPos) -> BlockType {
        let coord = pos.chunk();
        self.ensure_loaded(coord);
        self.peek_block(pos).unwrap_or(BlockType::Air)
    }

    /// Reads a block only if its chunk is already loaded.
    pub fn peek_block(&self, pos: BlockPos) -> Option<BlockType> {
        self.inner
            .chunks
            .lock()
            .get(&pos.chunk())
            .map(|chunk| chunk.get_block(pos))
    }

    /// Copy of a loaded chunk's voxels.
    pub fn chunk_snapshot(&self, coord: ChunkCoordinate) -> Option<VoxelGrid> {
        self.inner.chunks.lock().get(&coord).map(|c| c.voxels.clone())
    }

    /// Copy of a chunk's voxels, loading it on the calling thread if needed.
    pub fn load_snapshot(&self, coord: ChunkCoordinate) -> VoxelGrid {
        self.ensure_loaded(coord);
        self.chunk_snapshot(coord).unwrap_or_default()
    }

    /// Saves every dirty chunk. Chunks are copied under the lock and written
    /// outside it; a chunk whose save fails is marked dirty again.
    pub fn save_all_dirty(&self) -> SaveReport {
        let dirty: Vec<(ChunkCoordinate, VoxelGrid)> = {
            let mut chunks = self.inner.chunks.lock();
            chunks
                .values_mut()
                .filter(|c| c.dirty)
                .map(|c| {
                    c.dirty = false;
                    (c.coord, c.voxels.clone())
                })
                .collect()
        };

        let mut report = SaveReport::default();
        for (coord, voxels) in dirty {
            match self.inner.store.save_chunk(&self.inner.world, coord, &voxels) {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    tracing::error!(%coord, "failed to save chunk: {e}");
                    if let Some(chunk) = self.inner.chunks.lock().get_mut(&coord) {
                        chunk.dirty = true;
                    }
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Requests every chunk within `view_distance` of a player and unloads
    /// chunks that have drifted beyond `view_distance + UNLOAD_MARGIN` of all
    /// of them.
    pub fn update_interest(&self, centers: &[[f32; 3]], view_distance: i32) -> InterestReport {
        let mut report = InterestReport::default();
        let centers: Vec<ChunkCoordinate> = centers.iter().map(|&p| ChunkCoordinate::containing(p)).collect();

        for center in &centers {
            for dy in -self.vertical_radius..=self.vertical_radius {
                for dz in -view_distance..=view_distance {
                    for dx in -view_distance..=view_distance {
                        if self.load_chunk(center.offset(dx, dy, dz)).is_some() {
                            report.requested += 1;
                        }
                    }
                }
            }
        }

        let keep_h = view_distance + UNLOAD_MARGIN;
        let keep_v = self.vertical_radius + UNLOAD_MARGIN;
        let stale: Vec<ChunkCoordinate> = self
            .loaded_coords()
            .into_iter()
            .filter(|coord| {
                !centers.iter().any(|c| {
                    coord.horizontal_distance(*c) <= keep_h && coord.vertical_distance(*c) <= keep_v
                })
            })
            .collect();

        for coord in stale {
            match self.unload_chunk(coord) {
                Ok(true) => report.unloaded += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(%coord, "failed to persist chunk before unload: {e}"),
            }
        }

        if report.requested > 0 || report.unloaded > 0 {
            tracing::debug!(
                requested = report.requested,
                unloaded = report.unloaded,
                loaded = self.loaded_count(),
                "chunk interest updated"
            );
        }
        report
    }

    pub fn is_loaded(&self, coord: ChunkCoordinate) -> bool {
        self.inner.chunks.lock().contains_key(&coord)
    }

    pub fn is_pending(&self, coord: ChunkCoordinate) -> bool {
        self.inner.pending.contains(&coord)
    }

    pub fn loaded_coords(&self) -> Vec<ChunkCoordinate> {
        self.inner.chunks.lock().keys().copied().collect()
    }

    pub fn loaded_count(&self) -> usize {
        self.inner.chunks.lock().len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner.chunks.lock().values().filter(|c| c.dirty).count()
    }
}
