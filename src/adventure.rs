//! Text-adventure variant of the chat: every command travels with the
//! current world state, and the reply may hand back a new one.

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::dispatch::gemini::{self, Content};
use crate::dispatch::relay;
use crate::dispatch::{DispatchError, Provider, ProviderClient};
use crate::store::history::{HistoryStore, Turn};
use crate::store::world::{
    Difficulty, WorldState, load_difficulty, load_world, save_difficulty, save_world,
};
use crate::store::{KeyValueStore, StoreError};

pub const ADVENTURE_HISTORY_KEY: &str = "adventure_history";

pub const STARTING_LOCATIONS: [&str; 7] = [
    "A haunted forest",
    "A peaceful meadow",
    "An ancient ruined castle",
    "A dark dungeon",
    "A sunny beach",
    "A snowy mountain pass",
    "A bustling marketplace",
];

const SPOOKY: [&str; 2] = ["haunted forest", "dark dungeon"];
const SAFE_LOCATION: &str = "A sunny beach";

pub const CONTINUE_COMMAND: &str = "Continue game";

#[derive(Debug, thiserror::Error)]
pub enum AdventureError {
    #[error("The game is over. Start a new one with `parlor adventure new`.")]
    GameOver,
    #[error("Command is empty.")]
    EmptyCommand,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Failed to save game: {0}")]
    Store(#[from] StoreError),
}

pub fn random_location(rng: &mut impl Rng) -> &'static str {
    STARTING_LOCATIONS
        .choose(rng)
        .copied()
        .unwrap_or(SAFE_LOCATION)
}

pub fn is_age_appropriate(location: &str) -> bool {
    let lowered = location.to_lowercase();
    !SPOOKY.iter().any(|spooky| lowered.contains(spooky))
}

/// Starting location for a new game and the line announcing it.
///
/// Only a location the player typed is checked; the random pick may land
/// anywhere in the list.
pub fn choose_location(requested: Option<&str>, rng: &mut impl Rng) -> (String, String) {
    match requested.map(str::trim).filter(|location| !location.is_empty()) {
        None => {
            let location = random_location(rng);
            (
                location.to_string(),
                format!("You are starting in a {location}."),
            )
        }
        Some(location) if is_age_appropriate(location) => (
            location.to_string(),
            format!("Starting location: {location}"),
        ),
        Some(_) => (
            SAFE_LOCATION.to_string(),
            "The location you chose is too spooky. How about a sunny beach?".to_string(),
        ),
    }
}

pub fn start_command(world: &WorldState) -> String {
    format!("Start new game in {}", world.location)
}

/// What the game master answered to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameReply {
    pub text: String,
    pub world_state: Option<WorldState>,
}

/// Remote side of the adventure.
#[async_trait]
pub trait GameMaster: Send + Sync {
    async fn turn(
        &self,
        history: &[Turn],
        command: &Turn,
        world: &WorldState,
        difficulty: Difficulty,
    ) -> Result<GameReply, DispatchError>;
}

#[derive(Debug, Serialize)]
struct AdventureRequest<'a> {
    contents: Vec<Content>,
    world_state: &'a WorldState,
    difficulty: Difficulty,
}

/// Game master behind the relay endpoint.
#[derive(Debug, Clone)]
pub struct RelayGameMaster {
    client: ProviderClient,
}

impl RelayGameMaster {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }

    pub fn payload(
        &self,
        history: &[Turn],
        command: &Turn,
        world: &WorldState,
        difficulty: Difficulty,
    ) -> Value {
        serde_json::to_value(request(history, command, world, difficulty)).unwrap_or(Value::Null)
    }
}

fn request<'a>(
    history: &[Turn],
    command: &Turn,
    world: &'a WorldState,
    difficulty: Difficulty,
) -> AdventureRequest<'a> {
    AdventureRequest {
        contents: gemini::contents(Provider::Relay, history, command),
        world_state: world,
        difficulty,
    }
}

#[async_trait]
impl GameMaster for RelayGameMaster {
    async fn turn(
        &self,
        history: &[Turn],
        command: &Turn,
        world: &WorldState,
        difficulty: Difficulty,
    ) -> Result<GameReply, DispatchError> {
        let provider = self.client.provider();
        let reply = relay::exchange(&self.client, &request(history, command, world, difficulty)).await?;
        let text = relay::reply_text(provider, &reply)?;
        let world_state = match reply.get("world_state") {
            None | Some(Value::Null) => None,
            Some(value) => Some(serde_json::from_value(value.clone()).map_err(|err| {
                DispatchError::Malformed {
                    provider,
                    reason: format!("world_state: {err}"),
                }
            })?),
        };
        Ok(GameReply { text, world_state })
    }
}

/// A saved game: its transcript, world and difficulty.
pub struct Adventure<S, G> {
    storage: S,
    history: HistoryStore<S>,
    world: WorldState,
    difficulty: Difficulty,
    master: G,
}

impl<S: KeyValueStore + Clone, G: GameMaster> Adventure<S, G> {
    /// Loads the stored game, or a fresh world when none is saved.
    pub fn open(storage: S, master: G) -> Self {
        let history = HistoryStore::open_key(storage.clone(), ADVENTURE_HISTORY_KEY);
        let world = load_world(&storage).unwrap_or_default();
        let difficulty = load_difficulty(&storage);
        Self {
            storage,
            history,
            world,
            difficulty,
            master,
        }
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn history(&self) -> &[Turn] {
        self.history.turns()
    }

    /// Resets transcript and world for a new game at `location`.
    pub fn new_game(&mut self, location: String, difficulty: Difficulty) -> Result<(), StoreError> {
        self.history.clear()?;
        self.world = WorldState::starting_at(location);
        self.difficulty = difficulty;
        save_world(&self.storage, &self.world)?;
        save_difficulty(&self.storage, difficulty)?;
        info!(location = %self.world.location, %difficulty, "new adventure");
        Ok(())
    }

    /// Sends one command and records the result.
    ///
    /// The transcript is written before the world state.
    pub async fn play(&mut self, command: &str) -> Result<String, AdventureError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(AdventureError::EmptyCommand);
        }
        if self.world.game_over {
            return Err(AdventureError::GameOver);
        }

        let turn = Turn::user(command);
        let reply = self
            .master
            .turn(self.history.turns(), &turn, &self.world, self.difficulty)
            .await?;

        self.history.append(turn);
        self.history.append(Turn::assistant(reply.text.clone()));
        self.history.persist()?;

        if let Some(world) = reply.world_state {
            debug!(location = %world.location, score = world.score, game_over = world.game_over, "world updated");
            self.world = world;
        }
        save_world(&self.storage, &self.world)?;

        Ok(reply.text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    use super::*;
    use crate::dispatch::DispatchOptions;
    use crate::store::MemoryStore;
    use crate::store::world::WORLD_KEY;

    #[derive(Clone, Default)]
    struct FakeMaster {
        replies: Arc<Mutex<Vec<GameReply>>>,
        seen: Arc<Mutex<Vec<(usize, String, WorldState, Difficulty)>>>,
    }

    #[async_trait]
    impl GameMaster for FakeMaster {
        async fn turn(
            &self,
            history: &[Turn],
            command: &Turn,
            world: &WorldState,
            difficulty: Difficulty,
        ) -> Result<GameReply, DispatchError> {
            self.seen.lock().unwrap().push((
                history.len(),
                command.text.clone(),
                world.clone(),
                difficulty,
            ));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(DispatchError::EmptyResponse {
                    provider: Provider::Relay,
                });
            }
            Ok(replies.remove(0))
        }
    }

    #[test]
    fn spooky_locations_are_replaced() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(!is_age_appropriate("The HAUNTED forest edge"));
        assert!(is_age_appropriate("A quiet library"));

        let (location, line) = choose_location(Some("a dark dungeon"), &mut rng);
        assert_eq!(location, "A sunny beach");
        assert_eq!(line, "The location you chose is too spooky. How about a sunny beach?");

        let (location, line) = choose_location(Some("  A quiet library "), &mut rng);
        assert_eq!(location, "A quiet library");
        assert_eq!(line, "Starting location: A quiet library");

        let (location, _) = choose_location(Some(""), &mut rng);
        assert!(STARTING_LOCATIONS.contains(&location.as_str()));
    }

    #[tokio::test]
    async fn reply_world_state_replaces_stored_world() {
        let storage = MemoryStore::new();
        let master = FakeMaster::default();
        let mut next = WorldState::starting_at("A cave");
        next.score = 5;
        master.replies.lock().unwrap().push(GameReply {
            text: "You enter a cave.".to_string(),
            world_state: Some(next.clone()),
        });

        let mut game = Adventure::open(storage.clone(), master.clone());
        game.new_game("A sunny beach".to_string(), Difficulty::Hard).unwrap();
        let command = start_command(game.world());
        assert_eq!(command, "Start new game in A sunny beach");

        let text = game.play(&command).await.unwrap();
        assert_eq!(text, "You enter a cave.");
        assert_eq!(game.world(), &next);

        let seen = master.seen.lock().unwrap();
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[0].2.location, "A sunny beach");
        assert_eq!(seen[0].3, Difficulty::Hard);
        drop(seen);

        let reopened = Adventure::open(storage, FakeMaster::default());
        assert_eq!(reopened.world(), &next);
        assert_eq!(reopened.difficulty(), Difficulty::Hard);
        assert_eq!(reopened.history().len(), 2);
    }

    #[tokio::test]
    async fn commands_are_rejected_once_the_game_is_over() {
        let storage = MemoryStore::new();
        let master = FakeMaster::default();
        let mut over = WorldState::starting_at("A throne room");
        over.game_over = true;
        master.replies.lock().unwrap().push(GameReply {
            text: "You win!".to_string(),
            world_state: Some(over),
        });

        let mut game = Adventure::open(storage, master.clone());
        game.play("take crown").await.unwrap();
        assert!(matches!(game.play("look").await, Err(AdventureError::GameOver)));
        assert!(matches!(game.play("  ").await, Err(AdventureError::EmptyCommand)));
        assert_eq!(master.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_turn_changes_nothing() {
        let storage = MemoryStore::new();
        let mut game = Adventure::open(storage.clone(), FakeMaster::default());
        assert!(game.play("look").await.is_err());
        assert!(game.history().is_empty());
        assert_eq!(storage.get(WORLD_KEY).unwrap(), None);
    }

    #[test]
    fn relay_payload_carries_world_and_difficulty() {
        let master = RelayGameMaster::new(ProviderClient::new(
            Provider::Relay,
            None,
            None,
            DispatchOptions::default(),
        ));
        let world = WorldState::default();
        let value = master.payload(&[], &Turn::user(CONTINUE_COMMAND), &world, Difficulty::Easy);
        assert_eq!(
            value,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "Continue game"}]}],
                "world_state": {
                    "location": "A serene field",
                    "inventory": [],
                    "objects": [],
                    "score": 0,
                    "game_over": false,
                    "quests": [],
                },
                "difficulty": "easy",
            })
        );
    }
}
