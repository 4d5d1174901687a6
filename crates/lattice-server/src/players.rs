//! Connected-player registry.
//!
//! Ids are assigned from 1 upward and never reused within a server run.
//! Names are unique among connected players, compared case-insensitively.

use lattice_net::{MAX_NAME_LEN, unix_millis};
use rustc_hash::FxHashMap;

/// Why a player could not be added.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("server is full ({max} players)")]
    ServerFull { max: usize },

    #[error("name '{0}' is already taken")]
    NameTaken(String),

    #[error("invalid player name: {0}")]
    InvalidName(String),
}

/// Server-side record for one connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u32,
    pub name: String,
    pub position: [f32; 3],
    pub yaw: f32,
    pub pitch: f32,
    /// Unix milliseconds of the last accepted movement.
    pub last_update_ms: u64,
    pub connected: bool,
}

/// Players currently on the server.
#[derive(Debug)]
pub struct PlayerRegistry {
    players: FxHashMap<u32, PlayerState>,
    next_id: u32,
    max_players: usize,
}

impl PlayerRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: FxHashMap::default(),
            next_id: 1,
            max_players,
        }
    }

    /// Registers a player at `spawn` and returns the fresh id.
    ///
    /// Nothing is allocated on failure: a rejected join does not consume an id.
    pub fn add_player(&mut self, name: &str, spawn: [f32; 3]) -> Result<u32, JoinError> {
        validate_name(name)?;
        if self.players.len() >= self.max_players {
            return Err(JoinError::ServerFull {
                max: self.max_players,
            });
        }
        if self.find_by_name(name).is_some() {
            return Err(JoinError::NameTaken(name.to_string()));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.players.insert(
            id,
            PlayerState {
                id,
                name: name.to_string(),
                position: spawn,
                yaw: 0.0,
                pitch: 0.0,
                last_update_ms: unix_millis(),
                connected: true,
            },
        );
        Ok(id)
    }

    /// Removes a player. Returns the removed record; `None` if already gone.
    pub fn remove_player(&mut self, id: u32) -> Option<PlayerState> {
        let mut player = self.players.remove(&id)?;
        player.connected = false;
        Some(player)
    }

    pub fn get(&self, id: u32) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// Records a movement update. Returns `false` for an unknown id.
    pub fn update_transform(&mut self, id: u32, position: [f32; 3], yaw: f32, pitch: f32) -> bool {
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };
        player.position = position;
        player.yaw = yaw;
        player.pitch = pitch;
        player.last_update_ms = unix_millis();
        true
    }

    pub fn find_by_name(&self, name: &str) -> Option<&PlayerState> {
        self.players
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Players sorted by id.
    pub fn players(&self) -> Vec<PlayerState> {
        let mut players: Vec<_> = self.players.values().cloned().collect();
        players.sort_by_key(|p| p.id);
        players
    }

    pub fn positions(&self) -> Vec<[f32; 3]> {
        self.players.values().map(|p| p.position).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }
}

fn validate_name(name: &str) -> Result<(), JoinError> {
    if name.trim().is_empty() {
        return Err(JoinError::InvalidName("name is empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(JoinError::InvalidName(format!(
            "name is longer than {MAX_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(JoinError::InvalidName("name contains control characters".into()));
    }
    Ok(())
}
