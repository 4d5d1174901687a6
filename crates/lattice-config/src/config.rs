//! Configuration sections, their defaults, and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub scheduler: SchedulerConfig,
    pub network: NetworkConfig,
    pub debug: DebugConfig,
}

/// Dedicated and integrated server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub bind_address: String,
    pub port: u16,
    pub world_name: String,
    /// Seed for newly created worlds.
    pub seed: u32,
    pub max_players: usize,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    pub autosave_interval_secs: u64,
    /// Radius in chunks kept loaded around each player.
    pub view_distance: i32,
    pub spawn: [f32; 3],
    /// World save directory. `None` uses the platform data directory.
    pub save_dir: Option<PathBuf>,
}

/// Client connection and world cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub server_address: String,
    pub server_port: u16,
    pub player_name: String,
    pub handshake_timeout_secs: u64,
    /// Radius in chunks requested around the player.
    pub render_distance: i32,
    /// Upper bound on dirty-mesh rebuilds between two frames.
    pub max_mesh_rebuilds_per_frame: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; 0 uses the hardware parallelism.
    pub worker_threads: usize,
}

/// Transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Largest accepted frame in bytes.
    pub max_frame_size: usize,
    /// Sleep between idle passes of the network loops.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 25565,
            world_name: "world".to_string(),
            seed: 0,
            max_players: 20,
            tick_rate: 20,
            autosave_interval_secs: 300,
            view_distance: 4,
            spawn: [0.0, 18.0, 0.0],
            save_dir: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 25565,
            player_name: "Player".to_string(),
            handshake_timeout_secs: 10,
            render_distance: 4,
            max_mesh_rebuilds_per_frame: 8,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { worker_threads: 0 }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
            poll_interval_ms: 5,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// `<platform config dir>/lattice`, falling back to `./lattice`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lattice")
}

// --- Load / Save / Reload ---

impl Config {
    /// Loads `config.ron` from `config_dir`, writing the defaults first if it
    /// does not exist.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);

        if path.exists() {
            let config = Self::read(&path)?;
            log::info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Writes `config.ron` into `config_dir`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(false)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-reads the file. `Some` only if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &fresh != self {
            log::info!("Config reloaded with changes");
            Ok(Some(fresh))
        } else {
            Ok(None)
        }
    }

    /// Rejects values the server or client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }
        if self.server.tick_rate == 0 {
            return invalid("server.tick_rate", "must be at least 1");
        }
        if self.server.max_players == 0 {
            return invalid("server.max_players", "must be at least 1");
        }
        if self.server.view_distance < 0 {
            return invalid("server.view_distance", "must not be negative");
        }
        if self.client.player_name.trim().is_empty() {
            return invalid("client.player_name", "must not be empty");
        }
        if self.network.max_frame_size < 64 {
            return invalid("network.max_frame_size", "must be at least 64 bytes");
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_expectations() {
        let config = Config::default();
        assert_eq!(config.server.tick_rate, 20);
        assert_eq!(config.server.max_players, 20);
        assert_eq!(config.server.spawn, [0.0, 18.0, 0.0]);
        assert_eq!(config.client.handshake_timeout_secs, 10);
        assert_eq!(config.scheduler.worker_threads, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes() {
        let ron_str =
            ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 25565"));
        assert!(ron_str.contains("world_name: \"world\""));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(server: (port: 4000), debug: ())").unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.world_name, "world");
        assert_eq!(config.client, ClientConfig::default());
    }

    #[test]
    fn test_unknown_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(render: (fov: 90.0))");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.world_name = "islands".to_string();
        config.server.save_dir = Some(dir.path().join("saves"));
        config.client.player_name = "Alice".to_string();

        config.save(dir.path()).unwrap();
        assert_eq!(Config::load_or_create(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_load_or_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.server.max_players = 4;
        modified.save(dir.path()).unwrap();
        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.server.max_players, 4);
    }

    #[test]
    fn test_invalid_ron_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_tick_rate() {
        let mut config = Config::default();
        config.server.tick_rate = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "server.tick_rate", .. })
        ));
    }
}
