use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::StoreError;
use crate::store::kv::KeyValueStore;

pub const WORLD_KEY: &str = "world";
pub const DIFFICULTY_KEY: &str = "difficulty";

/// Text-adventure world, sent with every command and replaced by the reply's copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldState {
    pub location: String,
    pub inventory: Vec<String>,
    pub objects: Vec<String>,
    pub score: i64,
    pub game_over: bool,
    pub quests: Vec<String>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::starting_at("A serene field")
    }
}

impl WorldState {
    pub fn starting_at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            inventory: Vec::new(),
            objects: Vec::new(),
            score: 0,
            game_over: false,
            quests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "normal" => Ok(Difficulty::Normal),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!(
                "Invalid difficulty '{other}'. Supported values: easy, normal, hard."
            )),
        }
    }
}

/// Stored world, or `None` when absent. A corrupt entry is purged.
pub fn load_world(storage: &impl KeyValueStore) -> Option<WorldState> {
    let raw = match storage.get(WORLD_KEY) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(error = %err, "world state unreadable");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(world) => Some(world),
        Err(err) => {
            warn!(error = %err, "discarding corrupt world state");
            if let Err(err) = storage.remove(WORLD_KEY) {
                warn!(error = %err, "failed to purge corrupt world state");
            }
            None
        }
    }
}

pub fn save_world(storage: &impl KeyValueStore, world: &WorldState) -> Result<(), StoreError> {
    storage.set(WORLD_KEY, &serde_json::to_string(world)?)
}

pub fn load_difficulty(storage: &impl KeyValueStore) -> Difficulty {
    storage
        .get(DIFFICULTY_KEY)
        .ok()
        .flatten()
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

pub fn save_difficulty(
    storage: &impl KeyValueStore,
    difficulty: Difficulty,
) -> Result<(), StoreError> {
    storage.set(DIFFICULTY_KEY, difficulty.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryStore;

    #[test]
    fn world_round_trips_and_tolerates_missing_fields() {
        let storage = MemoryStore::new();
        assert_eq!(load_world(&storage), None);

        let mut world = WorldState::starting_at("A sunny beach");
        world.inventory.push("shell".to_string());
        save_world(&storage, &world).unwrap();
        assert_eq!(load_world(&storage), Some(world));

        storage.set(WORLD_KEY, r#"{"location":"Cave","score":3}"#).unwrap();
        let partial = load_world(&storage).unwrap();
        assert_eq!(partial.location, "Cave");
        assert_eq!(partial.score, 3);
        assert!(partial.inventory.is_empty());
    }

    #[test]
    fn corrupt_world_is_purged() {
        let storage = MemoryStore::new();
        storage.set(WORLD_KEY, "[[[").unwrap();
        assert_eq!(load_world(&storage), None);
        assert_eq!(storage.get(WORLD_KEY).unwrap(), None);
    }

    struct ReadOnly(MemoryStore);

    impl KeyValueStore for ReadOnly {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            Err(StoreError::Io {
                path: key.into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    #[test]
    fn failed_purge_still_loads_nothing() {
        let storage = ReadOnly(MemoryStore::new());
        storage.set(WORLD_KEY, "[[[").unwrap();
        assert_eq!(load_world(&storage), None);
        assert_eq!(storage.get(WORLD_KEY).unwrap().as_deref(), Some("[[["));
    }

    #[test]
    fn difficulty_defaults_to_easy() {
        let storage = MemoryStore::new();
        assert_eq!(load_difficulty(&storage), Difficulty::Easy);
        save_difficulty(&storage, Difficulty::Hard).unwrap();
        assert_eq!(load_difficulty(&storage), Difficulty::Hard);
    }
}
