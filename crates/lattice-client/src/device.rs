//! Render-device collaborator.
//!
//! The chunk cache never talks to a graphics API directly; it creates,
//! rewrites and destroys mesh buffers through [`RenderDevice`].
//! [`HeadlessDevice`] keeps only bookkeeping and is what runs when there is
//! no window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use lattice_voxel::ChunkCoordinate;
use parking_lot::Mutex;

use crate::mesh::ChunkMesh;

/// Errors raised while building a chunk mesh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    #[error("chunk {0} is not loaded")]
    ChunkNotLoaded(ChunkCoordinate),

    #[error("mesh has {0} vertices, more than a u32 index can address")]
    IndexOverflow(usize),
}

/// Errors raised by a [`RenderDevice`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("out of device memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("device lost")]
    DeviceLost,

    #[error(transparent)]
    Mesh(#[from] MeshError),
}

/// Handle to a chunk's vertex and index buffers on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshBuffers {
    pub id: u64,
    pub vertex_count: u32,
    pub index_count: u32,
    vertex_capacity: usize,
    index_capacity: usize,
}

impl MeshBuffers {
    /// Device-side handle with capacities sized for `mesh`.
    pub fn new(id: u64, mesh: &ChunkMesh) -> Self {
        Self {
            id,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
            vertex_capacity: mesh.vertex_bytes().len(),
            index_capacity: mesh.index_bytes().len(),
        }
    }

    /// `true` if `mesh` fits in the existing allocation.
    pub fn fits(&self, mesh: &ChunkMesh) -> bool {
        mesh.vertex_bytes().len() <= self.vertex_capacity && mesh.index_bytes().len() <= self.index_capacity
    }

    pub fn total_bytes(&self) -> usize {
        self.vertex_capacity + self.index_capacity
    }
}

/// GPU resource operations used by the chunk cache.
///
/// None of these may be called while a frame is being recorded; the cache
/// enforces that.
pub trait RenderDevice: Send + Sync {
    fn create_mesh_buffers(&self, mesh: &ChunkMesh) -> Result<MeshBuffers, RenderError>;

    /// Rewrites `buffers` with `mesh`, reallocating if it does not fit.
    fn update_mesh_buffers(&self, buffers: &mut MeshBuffers, mesh: &ChunkMesh) -> Result<(), RenderError>;

    fn destroy_mesh_buffers(&self, buffers: MeshBuffers);

    /// Blocks until the device has finished all submitted work.
    fn wait_idle(&self);
}

/// Counters reported by [`HeadlessDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub created: u64,
    pub updated: u64,
    pub reallocated: u64,
    pub destroyed: u64,
    pub wait_idle_calls: u64,
    pub live_buffers: u64,
    /// Buffer operations issued while the watched frame flag was set.
    pub frame_violations: u64,
}

/// Device without a GPU. Counts operations and can simulate failures.
#[derive(Default)]
pub struct HeadlessDevice {
    next_id: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    reallocated: AtomicU64,
    destroyed: AtomicU64,
    wait_idle_calls: AtomicU64,
    frame_violations: AtomicU64,
    fail_next: AtomicUsize,
    frame_flag: Mutex<Option<Arc<AtomicBool>>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation whenever a buffer operation runs while `flag` is set.
    pub fn watch_frame_flag(&self, flag: Arc<AtomicBool>) {
        *self.frame_flag.lock() = Some(flag);
    }

    /// Makes the next `count` create/update calls fail with out-of-memory.
    pub fn fail_next_uploads(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn stats(&self) -> DeviceStats {
        let created = self.created.load(Ordering::SeqCst);
        let reallocated = self.reallocated.load(Ordering::SeqCst);
        let destroyed = self.destroyed.load(Ordering::SeqCst);
        DeviceStats {
            created,
            updated: self.updated.load(Ordering::SeqCst),
            reallocated,
            destroyed,
            wait_idle_calls: self.wait_idle_calls.load(Ordering::SeqCst),
            live_buffers: created.saturating_sub(destroyed),
            frame_violations: self.frame_violations.load(Ordering::SeqCst),
        }
    }

    fn check_frame(&self) {
        let in_frame = self
            .frame_flag
            .lock()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst));
        if in_frame {
            self.frame_violations.fetch_add(1, Ordering::SeqCst);
            tracing::error!("mesh buffer operation during frame recording");
        }
    }

    fn take_failure(&self, mesh: &ChunkMesh) -> Result<(), RenderError> {
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(RenderError::OutOfMemory {
                requested: mesh.vertex_bytes().len() + mesh.index_bytes().len(),
            })
        } else {
            Ok(())
        }
    }
}

impl RenderDevice for HeadlessDevice {
    fn create_mesh_buffers(&self, mesh: &ChunkMesh) -> Result<MeshBuffers, RenderError> {
        self.check_frame();
        self.take_failure(mesh)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MeshBuffers::new(id, mesh))
    }

    fn update_mesh_buffers(&self, buffers: &mut MeshBuffers, mesh: &ChunkMesh) -> Result<(), RenderError> {
        self.check_frame();
        self.take_failure(mesh)?;
        self.updated.fetch_add(1, Ordering::SeqCst);
        if buffers.fits(mesh) {
            buffers.vertex_count = mesh.vertices.len() as u32;
            buffers.index_count = mesh.indices.len() as u32;
        } else {
            self.reallocated.fetch_add(1, Ordering::SeqCst);
            *buffers = MeshBuffers::new(buffers.id, mesh);
        }
        Ok(())
    }

    fn destroy_mesh_buffers(&self, _buffers: MeshBuffers) {
        self.check_frame();
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_idle(&self) {
        self.wait_idle_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_chunk_mesh;
    use lattice_voxel::{BlockType, VoxelGrid};

    fn mesh_with_blocks(n: usize) -> ChunkMesh {
        let mut grid = VoxelGrid::new();
        for i in 0..n {
            grid.set(i * 2, 0, 0, BlockType::Stone);
        }
        build_chunk_mesh(ChunkCoordinate::new(0, 0, 0), &grid, |_| false)
    }

    #[test]
    fn test_create_update_destroy_counts() {
        let device = HeadlessDevice::new();
        let mut buffers = device.create_mesh_buffers(&mesh_with_blocks(2)).unwrap();
        assert_eq!(buffers.index_count, 2 * 36);

        device.update_mesh_buffers(&mut buffers, &mesh_with_blocks(1)).unwrap();
        assert_eq!(buffers.index_count, 36);
        device.update_mesh_buffers(&mut buffers, &mesh_with_blocks(3)).unwrap();
        device.destroy_mesh_buffers(buffers);

        let stats = device.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.reallocated, 1);
        assert_eq!(stats.live_buffers, 0);
    }

    #[test]
    fn test_injected_failures() {
        let device = HeadlessDevice::new();
        device.fail_next_uploads(1);
        assert!(matches!(
            device.create_mesh_buffers(&mesh_with_blocks(1)),
            Err(RenderError::OutOfMemory { .. })
        ));
        assert!(device.create_mesh_buffers(&mesh_with_blocks(1)).is_ok());
    }

    #[test]
    fn test_frame_violations_are_recorded() {
        let device = HeadlessDevice::new();
        let flag = Arc::new(AtomicBool::new(false));
        device.watch_frame_flag(Arc::clone(&flag));
        let buffers = device.create_mesh_buffers(&mesh_with_blocks(1)).unwrap();
        flag.store(true, Ordering::SeqCst);
        device.destroy_mesh_buffers(buffers);
        assert_eq!(device.stats().frame_violations, 1);
    }
}
