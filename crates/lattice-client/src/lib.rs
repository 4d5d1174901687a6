//! Client-side world state: the chunk cache mirrored from the server, chunk
//! meshing, view-frustum culling and the render-device seam that owns mesh
//! buffers.

pub mod cache;
pub mod device;
pub mod frustum;
pub mod mesh;

pub use cache::{CacheStats, ChunkCache, ChunkMap, ChunkMapGuard, ClientChunk, DrawItem, FlushReport};
pub use device::{DeviceStats, HeadlessDevice, MeshBuffers, MeshError, RenderDevice, RenderError};
pub use frustum::{Aabb, Frustum};
pub use mesh::{ChunkMesh, ChunkVertex, FaceDirection, build_chunk_mesh};
