//! Server authority: the fixed-rate tick loop, player sessions, chunk
//! ownership, world persistence, terrain generation and the operator console.

pub mod chunks;
pub mod console;
pub mod events;
pub mod players;
pub mod save;
pub mod server;
pub mod terrain;
pub mod tick;

#[cfg(test)]
mod e2e_tests;

pub use chunks::{InterestReport, SaveReport, ServerChunk, ServerChunkManager};
pub use console::{ConsoleCommand, ConsoleError};
pub use events::{GameEvent, GameEventKind};
pub use players::{JoinError, PlayerRegistry, PlayerState};
pub use save::{DirectorySaveStore, MemorySaveStore, SaveError, SaveStore, WorldMeta, open_or_create_world};
pub use server::{BlockPermission, GameServer, ServerConfig, ServerError, ServerStats};
pub use terrain::{TerrainGenerator, TerrainParams};
pub use tick::ServerTickSchedule;
