//! World persistence collaborator.
//!
//! The server talks to storage only through [`SaveStore`]. Two stores ship:
//! [`MemorySaveStore`] for tests and throwaway worlds, and
//! [`DirectorySaveStore`] which keeps one directory per world with a RON
//! metadata file and one LZ4-compressed blob per chunk.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use lattice_voxel::{ChunkCoordinate, VoxelError, VoxelGrid};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

const META_FILE: &str = "world.ron";
const CHUNK_DIR: &str = "chunks";
const MAX_WORLD_NAME_LEN: usize = 64;

/// Errors produced by a [`SaveStore`].
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse world metadata: {0}")]
    ParseMeta(#[source] ron::error::SpannedError),

    #[error("failed to serialize world metadata: {0}")]
    SerializeMeta(#[source] ron::Error),

    #[error("failed to decompress chunk {coord}: {source}")]
    Decompress {
        coord: ChunkCoordinate,
        #[source]
        source: lz4_flex::block::DecompressError,
    },

    #[error("corrupt chunk {coord}: {source}")]
    Corrupt {
        coord: ChunkCoordinate,
        #[source]
        source: VoxelError,
    },

    #[error("world '{0}' already exists")]
    WorldExists(String),

    #[error("world '{0}' does not exist")]
    UnknownWorld(String),

    #[error("invalid world name '{0}'")]
    InvalidWorldName(String),
}

/// Persistent description of a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub name: String,
    pub seed: u32,
    pub spawn: [f32; 3],
    pub created_unix_secs: u64,
    pub last_saved_unix_secs: u64,
    /// Server tick count at the last save.
    pub tick: u64,
}

impl WorldMeta {
    pub fn new(name: impl Into<String>, seed: u32, spawn: [f32; 3]) -> Self {
        let now = unix_secs();
        Self {
            name: name.into(),
            seed,
            spawn,
            created_unix_secs: now,
            last_saved_unix_secs: now,
            tick: 0,
        }
    }
}

/// Storage for world metadata and chunk voxel blocks.
pub trait SaveStore: Send + Sync {
    /// Creates a new world. Fails with [`SaveError::WorldExists`] if present.
    fn create_world(&self, meta: &WorldMeta) -> Result<(), SaveError>;

    /// Names of every stored world, sorted.
    fn list_worlds(&self) -> Result<Vec<String>, SaveError>;

    fn save_world_meta(&self, meta: &WorldMeta) -> Result<(), SaveError>;

    /// `None` if the world does not exist.
    fn load_world_meta(&self, world: &str) -> Result<Option<WorldMeta>, SaveError>;

    fn save_chunk(&self, world: &str, coord: ChunkCoordinate, voxels: &VoxelGrid) -> Result<(), SaveError>;

    /// `None` if the chunk was never saved.
    fn load_chunk(&self, world: &str, coord: ChunkCoordinate) -> Result<Option<VoxelGrid>, SaveError>;
}

/// Loads a world's metadata, creating the world with `seed` and `spawn` if
/// it does not exist yet.
pub fn open_or_create_world(
    store: &dyn SaveStore,
    name: &str,
    seed: u32,
    spawn: [f32; 3],
) -> Result<WorldMeta, SaveError> {
    if let Some(meta) = store.load_world_meta(name)? {
        tracing::info!(world = name, seed = meta.seed, "opened existing world");
        return Ok(meta);
    }
    let meta = WorldMeta::new(name, seed, spawn);
    store.create_world(&meta)?;
    tracing::info!(world = name, seed, "created new world");
    Ok(meta)
}

fn validate_world_name(name: &str) -> Result<(), SaveError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_WORLD_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SaveError::InvalidWorldName(name.to_string()))
    }
}

pub(crate) fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryWorld {
    meta: Option<WorldMeta>,
    chunks: FxHashMap<ChunkCoordinate, VoxelGrid>,
}

/// Keeps everything in memory. Contents vanish with the store.
#[derive(Default)]
pub struct MemorySaveStore {
    worlds: Mutex<FxHashMap<String, MemoryWorld>>,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks stored for `world`.
    pub fn chunk_count(&self, world: &str) -> usize {
        self.worlds.lock().get(world).map_or(0, |w| w.chunks.len())
    }
}

impl SaveStore for MemorySaveStore {
    fn create_world(&self, meta: &WorldMeta) -> Result<(), SaveError> {
        validate_world_name(&meta.name)?;
        let mut worlds = self.worlds.lock();
        if worlds.contains_key(&meta.name) {
            return Err(SaveError::WorldExists(meta.name.clone()));
        }
        worlds.insert(
            meta.name.clone(),
            MemoryWorld {
                meta: Some(meta.clone()),
                chunks: FxHashMap::default(),
            },
        );
        Ok(())
    }

    fn list_worlds(&self) -> Result<Vec<String>, SaveError> {
        let mut names: Vec<String> = self.worlds.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn save_world_meta(&self, meta: &WorldMeta) -> Result<(), SaveError> {
        validate_world_name(&meta.name)?;
        self.worlds.lock().entry(meta.name.clone()).or_default().meta = Some(meta.clone());
        Ok(())
    }

    fn load_world_meta(&self, world: &str) -> Result<Option<WorldMeta>, SaveError> {
        Ok(self.worlds.lock().get(world).and_then(|w| w.meta.clone()))
    }

    fn save_chunk(&self, world: &str, coord: ChunkCoordinate, voxels: &VoxelGrid) -> Result<(), SaveError> {
        let mut worlds = self.worlds.lock();
        let entry = worlds
            .get_mut(world)
            .ok_or_else(|| SaveError::UnknownWorld(world.to_string()))?;
        entry.chunks.insert(coord, voxels.clone());
        Ok(())
    }

    fn load_chunk(&self, world: &str, coord: ChunkCoordinate) -> Result<Option<VoxelGrid>, SaveError> {
        Ok(self
            .worlds
            .lock()
            .get(world)
            .and_then(|w| w.chunks.get(&coord).cloned()))
    }
}

// ---------------------------------------------------------------------------
// Directory store
// ---------------------------------------------------------------------------

/// One directory per world under `root`:
///
/// ```text
/// <root>/<world>/world.ron
/// <root>/<world>/chunks/<x>_<y>_<z>.chunk
/// ```
pub struct DirectorySaveStore {
    root: PathBuf,
}

impl DirectorySaveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn world_dir(&self, world: &str) -> Result<PathBuf, SaveError> {
        validate_world_name(world)?;
        Ok(self.root.join(world))
    }

    fn chunk_path(&self, world: &str, coord: ChunkCoordinate) -> Result<PathBuf, SaveError> {
        Ok(self
            .world_dir(world)?
            .join(CHUNK_DIR)
            .join(format!("{}_{}_{}.chunk", coord.x, coord.y, coord.z)))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SaveError + '_ {
    move |source| SaveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes through a sibling temp file so a crash never leaves a torn file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SaveError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(io_error(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_error(path))
}

impl SaveStore for DirectorySaveStore {
    fn create_world(&self, meta: &WorldMeta) -> Result<(), SaveError> {
        let dir = self.world_dir(&meta.name)?;
        if dir.join(META_FILE).exists() {
            return Err(SaveError::WorldExists(meta.name.clone()));
        }
        let chunks = dir.join(CHUNK_DIR);
        std::fs::create_dir_all(&chunks).map_err(io_error(&chunks))?;
        self.save_world_meta(meta)
    }

    fn list_worlds(&self) -> Result<Vec<String>, SaveError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(io_error(&self.root))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&self.root))?;
            if entry.path().join(META_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn save_world_meta(&self, meta: &WorldMeta) -> Result<(), SaveError> {
        let dir = self.world_dir(&meta.name)?;
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let contents = ron::ser::to_string_pretty(meta, pretty).map_err(SaveError::SerializeMeta)?;
        write_atomic(&dir.join(META_FILE), contents.as_bytes())
    }

    fn load_world_meta(&self, world: &str) -> Result<Option<WorldMeta>, SaveError> {
        let path = self.world_dir(world)?.join(META_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        let meta = ron::from_str(&contents).map_err(SaveError::ParseMeta)?;
        Ok(Some(meta))
    }

    fn save_chunk(&self, world: &str, coord: ChunkCoordinate, voxels: &VoxelGrid) -> Result<(), SaveError> {
        let path = self.chunk_path(world, coord)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let compressed = lz4_flex::compress_prepend_size(voxels.as_bytes());
        write_atomic(&path, &compressed)
    }

    fn load_chunk(&self, world: &str, coord: ChunkCoordinate) -> Result<Option<VoxelGrid>, SaveError> {
        let path = self.chunk_path(world, coord)?;
        let compressed = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };
        let raw = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|source| SaveError::Decompress { coord, source })?;
        let grid = VoxelGrid::from_bytes(&raw).map_err(|source| SaveError::Corrupt { coord, source })?;
        Ok(Some(grid))
    }
}
