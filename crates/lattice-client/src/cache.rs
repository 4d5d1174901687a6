//! Client-side chunk cache.
//!
//! Mirrors the chunks the server has sent and keeps a mesh for each. The
//! render driver brackets command recording with
//! [`set_frame_in_progress`](ChunkCache::set_frame_in_progress); while that
//! flag is set no mesh buffer is created, rewritten or destroyed. Mutations
//! that arrive mid-frame queue their chunk in a de-duplicated deferred queue
//! instead, and the driver calls [`flush_deferred`](ChunkCache::flush_deferred)
//! between frames.
//!
//! Lock order: the chunk map lock is taken before the deferred queue lock,
//! never the other way round.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lattice_net::Message;
use lattice_voxel::{BlockPos, BlockType, CHUNK_SIZE, ChunkCoordinate, VoxelGrid};
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::device::{MeshBuffers, MeshError, RenderDevice, RenderError};
use crate::frustum::{Aabb, Frustum};
use crate::mesh::build_chunk_mesh;

/// One mirrored chunk.
#[derive(Debug)]
pub struct ClientChunk {
    pub coord: ChunkCoordinate,
    pub voxels: VoxelGrid,
    mesh_dirty: bool,
    modified: bool,
    pending_removal: bool,
    buffers: Option<MeshBuffers>,
}

impl ClientChunk {
    fn new(coord: ChunkCoordinate, voxels: VoxelGrid) -> Self {
        Self {
            coord,
            voxels,
            mesh_dirty: true,
            modified: false,
            pending_removal: false,
            buffers: None,
        }
    }

    pub fn is_mesh_dirty(&self) -> bool {
        self.mesh_dirty
    }

    /// Touched by a local block update since it arrived.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal
    }

    pub fn buffers(&self) -> Option<&MeshBuffers> {
        self.buffers.as_ref()
    }
}

/// The chunk map. Only reachable through [`ChunkCache::lock`], so holding a
/// `&ChunkMap` proves the cache lock is held.
#[derive(Debug, Default)]
pub struct ChunkMap {
    chunks: FxHashMap<ChunkCoordinate, ClientChunk>,
}

impl ChunkMap {
    /// Solid-voxel query for callers already holding the map lock.
    /// Unloaded chunks read as not solid.
    pub fn is_solid_at(&self, pos: BlockPos) -> bool {
        self.block_at(pos).is_some_and(BlockType::is_solid)
    }

    pub fn block_at(&self, pos: BlockPos) -> Option<BlockType> {
        let (coord, local) = pos.to_chunk_local();
        self.chunks
            .get(&coord)
            .filter(|c| !c.pending_removal)
            .map(|c| c.voxels.get_local(local))
    }

    pub fn get(&self, coord: ChunkCoordinate) -> Option<&ClientChunk> {
        self.chunks.get(&coord)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn coords(&self) -> impl Iterator<Item = ChunkCoordinate> + '_ {
        self.chunks.keys().copied()
    }

    fn is_modified(&self, coord: ChunkCoordinate) -> bool {
        self.chunks.get(&coord).is_some_and(|c| c.modified)
    }
}

/// Guard over the chunk map.
pub type ChunkMapGuard<'a> = MutexGuard<'a, ChunkMap>;

#[derive(Default)]
struct DeferredQueue {
    order: VecDeque<ChunkCoordinate>,
    queued: FxHashSet<ChunkCoordinate>,
}

impl DeferredQueue {
    fn push(&mut self, coord: ChunkCoordinate) {
        if self.queued.insert(coord) {
            self.order.push_back(coord);
        }
    }

    fn take(&mut self) -> VecDeque<ChunkCoordinate> {
        self.queued.clear();
        std::mem::take(&mut self.order)
    }
}

/// A chunk ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub coord: ChunkCoordinate,
    pub buffers: MeshBuffers,
}

/// Result of [`ChunkCache::flush_deferred`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub rebuilt: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub loaded_chunks: usize,
    pub meshed_chunks: usize,
    pub dirty_chunks: usize,
    pub deferred: usize,
    pub rebuilds: u64,
    pub failed_rebuilds: u64,
}

/// Where a rebuild runs. Inline rebuilds wait on the device before
/// destroying buffers. Deferred rebuilds only run from `flush_deferred`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebuildPath {
    Inline,
    Deferred,
}

/// Client chunk cache with frame-safe mesh maintenance.
pub struct ChunkCache {
    map: Mutex<ChunkMap>,
    deferred: Mutex<DeferredQueue>,
    frame_in_progress: Arc<AtomicBool>,
    device: Arc<dyn RenderDevice>,
    surface_layer: i32,
    rebuilds: AtomicU64,
    failed_rebuilds: AtomicU64,
}

impl ChunkCache {
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            map: Mutex::new(ChunkMap::default()),
            deferred: Mutex::new(DeferredQueue::default()),
            frame_in_progress: Arc::new(AtomicBool::new(false)),
            device,
            surface_layer: 0,
            rebuilds: AtomicU64::new(0),
            failed_rebuilds: AtomicU64::new(0),
        }
    }

    /// Chunk layer treated as the ground surface by the occlusion heuristic.
    pub fn with_surface_layer(mut self, layer: i32) -> Self {
        self.surface_layer = layer;
        self
    }

    // -- Frame lifecycle ------------------------------------------------------

    /// Set by the render driver before recording commands, cleared after
    /// submission.
    ///
    /// Raising the flag takes the chunk map lock, so it waits for any rebuild
    /// already talking to the device. Must not be called while holding
    /// [`lock`](Self::lock).
    pub fn set_frame_in_progress(&self, in_progress: bool) {
        if in_progress {
            let _map = self.map.lock();
            self.frame_in_progress.store(true, Ordering::SeqCst);
        } else {
            self.frame_in_progress.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_in_progress.load(Ordering::SeqCst)
    }

    /// Shared handle to the frame flag, for collaborators that observe it.
    pub fn frame_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.frame_in_progress)
    }

    // -- Queries --------------------------------------------------------------

    /// Locks the chunk map.
    pub fn lock(&self) -> ChunkMapGuard<'_> {
        self.map.lock()
    }

    /// Locking variant of [`ChunkMap::is_solid_at`]. Must not be called while
    /// holding [`lock`](Self::lock).
    pub fn is_solid_at(&self, pos: BlockPos) -> bool {
        self.map.lock().is_solid_at(pos)
    }

    pub fn get_block(&self, pos: BlockPos) -> Option<BlockType> {
        self.map.lock().block_at(pos)
    }

    pub fn is_loaded(&self, coord: ChunkCoordinate) -> bool {
        self.map
            .lock()
            .get(coord)
            .is_some_and(|c| !c.pending_removal)
    }

    pub fn is_mesh_dirty(&self, coord: ChunkCoordinate) -> bool {
        self.map.lock().get(coord).is_some_and(|c| c.mesh_dirty)
    }

    pub fn is_modified(&self, coord: ChunkCoordinate) -> bool {
        self.map.lock().is_modified(coord)
    }

    /// Coordinates waiting for the next flush, in queue order.
    pub fn deferred_coords(&self) -> Vec<ChunkCoordinate> {
        self.deferred.lock().order.iter().copied().collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().order.len()
    }

    // -- Mutations ------------------------------------------------------------

    /// Stores chunk data from the server and (re)builds its mesh.
    ///
    /// Loaded neighbours are marked mesh-dirty so their shared faces are
    /// re-culled by [`update_dirty`](Self::update_dirty).
    pub fn set_chunk_data(&self, coord: ChunkCoordinate, voxels: VoxelGrid) {
        let mut map = self.map.lock();
        match map.chunks.get_mut(&coord) {
            Some(chunk) => {
                chunk.voxels = voxels;
                chunk.mesh_dirty = true;
                chunk.pending_removal = false;
            }
            None => {
                map.chunks.insert(coord, ClientChunk::new(coord, voxels));
            }
        }
        for neighbor in coord.face_neighbors() {
            if let Some(chunk) = map.chunks.get_mut(&neighbor) {
                chunk.mesh_dirty = true;
            }
        }
        self.schedule_rebuild(&mut map, coord);
    }

    /// Applies a single-block change. Returns `false` if the chunk is not
    /// loaded or the block already had that value.
    ///
    /// The chunk is marked modified and rebuilt; when the block lies on a
    /// chunk face, the chunk across that face is marked modified and rebuilt
    /// too.
    pub fn update_block(&self, pos: BlockPos, block: BlockType) -> bool {
        let (coord, local) = pos.to_chunk_local();
        let mut map = self.map.lock();
        let Some(chunk) = map.chunks.get_mut(&coord) else {
            return false;
        };
        if chunk.pending_removal {
            return false;
        }
        match chunk.voxels.set_local(local, block) {
            Some(previous) if previous != block => {}
            _ => return false,
        }
        chunk.modified = true;
        chunk.mesh_dirty = true;
        self.schedule_rebuild(&mut map, coord);

        let last = CHUNK_SIZE - 1;
        let boundary = [
            (local.x == 0, (-1, 0, 0)),
            (local.x == last, (1, 0, 0)),
            (local.y == 0, (0, -1, 0)),
            (local.y == last, (0, 1, 0)),
            (local.z == 0, (0, 0, -1)),
            (local.z == last, (0, 0, 1)),
        ];
        for (on_face, (dx, dy, dz)) in boundary {
            if !on_face {
                continue;
            }
            let neighbor = coord.offset(dx, dy, dz);
            if let Some(chunk) = map.chunks.get_mut(&neighbor) {
                if chunk.pending_removal {
                    continue;
                }
                chunk.modified = true;
                chunk.mesh_dirty = true;
                self.schedule_rebuild(&mut map, neighbor);
            }
        }
        true
    }

    /// Drops a chunk and its mesh buffers.
    ///
    /// During a frame the chunk is only marked and destroyed by the next
    /// flush. Otherwise the device is waited on before its buffers go.
    pub fn remove_chunk(&self, coord: ChunkCoordinate) -> bool {
        let mut map = self.map.lock();
        let Some(chunk) = map.chunks.get_mut(&coord) else {
            return false;
        };

        if self.is_frame_in_progress() {
            chunk.pending_removal = true;
            self.deferred.lock().push(coord);
        } else if let Some(chunk) = map.chunks.remove(&coord) {
            if let Some(buffers) = chunk.buffers {
                self.device.wait_idle();
                self.device.destroy_mesh_buffers(buffers);
            }
        }

        for neighbor in coord.face_neighbors() {
            if let Some(chunk) = map.chunks.get_mut(&neighbor) {
                chunk.mesh_dirty = true;
            }
        }
        true
    }

    /// Applies chunk data and block updates from the server. Returns `true`
    /// if the message changed the cache.
    pub fn apply_message(&self, message: &Message) -> bool {
        match message {
            Message::ChunkData(data) => {
                self.set_chunk_data(data.coord, data.voxels.clone().unwrap_or_default());
                true
            }
            Message::BlockUpdate(update) => self.update_block(update.pos, update.block),
            _ => false,
        }
    }

    // -- Between-frame maintenance ---------------------------------------------

    /// Processes every deferred rebuild and removal. Must only be called
    /// between frames; during a frame it does nothing.
    ///
    /// A chunk whose rebuild fails is logged and left dirty; the rest of the
    /// queue still runs.
    pub fn flush_deferred(&self) -> FlushReport {
        let mut report = FlushReport::default();
        let mut map = self.map.lock();
        if self.is_frame_in_progress() {
            tracing::warn!("flush_deferred called during a frame, skipping");
            return report;
        }

        let queued = self.deferred.lock().take();
        for coord in queued {
            let removing = match map.chunks.get(&coord) {
                Some(chunk) => chunk.pending_removal,
                None => continue,
            };
            if removing {
                if let Some(chunk) = map.chunks.remove(&coord) {
                    if let Some(buffers) = chunk.buffers {
                        self.device.destroy_mesh_buffers(buffers);
                    }
                }
                report.removed += 1;
                continue;
            }
            match self.rebuild_locked(&mut map, coord, RebuildPath::Deferred) {
                Ok(()) => report.rebuilt += 1,
                Err(e) => {
                    tracing::error!(%coord, "deferred mesh rebuild failed: {e}");
                    report.failed += 1;
                }
            }
        }
        if report.rebuilt + report.removed + report.failed > 0 {
            tracing::debug!(
                rebuilt = report.rebuilt,
                removed = report.removed,
                failed = report.failed,
                "flushed deferred mesh updates"
            );
        }
        report
    }

    /// Rebuilds at most `max` mesh-dirty chunks that are not queued for
    /// deferred work. Returns how many were rebuilt. Does nothing during a
    /// frame.
    pub fn update_dirty(&self, max: usize) -> usize {
        let mut map = self.map.lock();
        if max == 0 || self.is_frame_in_progress() {
            return 0;
        }
        let mut dirty: Vec<ChunkCoordinate> = {
            let deferred = self.deferred.lock();
            map.chunks
                .values()
                .filter(|c| c.mesh_dirty && !c.pending_removal && !deferred.queued.contains(&c.coord))
                .map(|c| c.coord)
                .collect()
        };
        dirty.sort();
        dirty.truncate(max);

        let mut rebuilt = 0;
        for coord in dirty {
            match self.rebuild_locked(&mut map, coord, RebuildPath::Inline) {
                Ok(()) => rebuilt += 1,
                Err(e) => tracing::warn!(%coord, "mesh rebuild failed: {e}"),
            }
        }
        rebuilt
    }

    /// Meshes inside `frustum`, minus below-ground chunks the surface
    /// heuristic considers hidden.
    pub fn visible_chunk_meshes(&self, frustum: &Frustum) -> Vec<DrawItem> {
        let map = self.map.lock();
        map.chunks
            .values()
            .filter(|c| !c.pending_removal)
            .filter_map(|c| c.buffers.as_ref().map(|b| (c, b)))
            .filter(|(c, _)| frustum.is_visible(&Aabb::for_chunk(c.coord)))
            .filter(|(c, _)| !self.is_occluded(&map, c))
            .map(|(c, b)| DrawItem {
                coord: c.coord,
                buffers: b.clone(),
            })
            .collect()
    }

    /// An unmodified chunk below the surface layer is hidden when the surface
    /// chunk above it is loaded and unmodified and none of that surface
    /// chunk's four horizontal neighbours has been modified. Any modification
    /// disables the shortcut.
    fn is_occluded(&self, map: &ChunkMap, chunk: &ClientChunk) -> bool {
        if chunk.coord.y >= self.surface_layer || chunk.modified {
            return false;
        }
        let surface = ChunkCoordinate::new(chunk.coord.x, self.surface_layer, chunk.coord.z);
        let surface_intact = map
            .get(surface)
            .is_some_and(|c| !c.modified && !c.pending_removal);
        surface_intact
            && [(1, 0), (-1, 0), (0, 1), (0, -1)]
                .iter()
                .all(|&(dx, dz)| !map.is_modified(surface.offset(dx, 0, dz)))
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.map.lock();
        CacheStats {
            loaded_chunks: map.chunks.values().filter(|c| !c.pending_removal).count(),
            meshed_chunks: map.chunks.values().filter(|c| c.buffers.is_some()).count(),
            dirty_chunks: map.chunks.values().filter(|c| c.mesh_dirty).count(),
            deferred: self.deferred.lock().order.len(),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            failed_rebuilds: self.failed_rebuilds.load(Ordering::Relaxed),
        }
    }

    // -- Internals --------------------------------------------------------------

    /// Rebuilds now when no frame is in flight, otherwise queues the chunk.
    fn schedule_rebuild(&self, map: &mut ChunkMap, coord: ChunkCoordinate) {
        if self.is_frame_in_progress() {
            self.deferred.lock().push(coord);
            return;
        }
        if let Err(e) = self.rebuild_locked(map, coord, RebuildPath::Inline) {
            tracing::error!(%coord, "mesh rebuild failed: {e}");
        }
    }

    fn rebuild_locked(&self, map: &mut ChunkMap, coord: ChunkCoordinate, path: RebuildPath) -> Result<(), RenderError> {
        let mesh = {
            let chunk = map.get(coord).ok_or(MeshError::ChunkNotLoaded(coord))?;
            build_chunk_mesh(coord, &chunk.voxels, |pos| map.is_solid_at(pos))
        };
        if u32::try_from(mesh.vertices.len()).is_err() {
            return Err(MeshError::IndexOverflow(mesh.vertices.len()).into());
        }

        let chunk = map
            .chunks
            .get_mut(&coord)
            .ok_or(MeshError::ChunkNotLoaded(coord))?;

        let result = if mesh.is_empty() {
            if let Some(buffers) = chunk.buffers.take() {
                if path == RebuildPath::Inline {
                    self.device.wait_idle();
                }
                self.device.destroy_mesh_buffers(buffers);
            }
            Ok(())
        } else {
            match chunk.buffers.as_mut() {
                Some(buffers) => self.device.update_mesh_buffers(buffers, &mesh),
                None => self
                    .device
                    .create_mesh_buffers(&mesh)
                    .map(|buffers| chunk.buffers = Some(buffers)),
            }
        };

        match result {
            Ok(()) => {
                chunk.mesh_dirty = false;
                self.rebuilds.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.failed_rebuilds.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

impl Drop for ChunkCache {
    fn drop(&mut self) {
        let map = self.map.get_mut();
        let buffers: Vec<MeshBuffers> = map.chunks.values_mut().filter_map(|c| c.buffers.take()).collect();
        if !buffers.is_empty() {
            self.device.wait_idle();
            for b in buffers {
                self.device.destroy_mesh_buffers(b);
            }
        }
    }
}
