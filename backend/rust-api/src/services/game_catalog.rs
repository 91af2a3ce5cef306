use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    Collection, Database,
};

use crate::error::{EngineError, EngineResult};
use crate::metrics::track_store_operation;
use crate::models::game::Game;

pub const GAMES_COLLECTION: &str = "games";

/// Authored, immutable game content.
#[async_trait]
pub trait GameCatalog: Send + Sync {
    async fn get(&self, game_id: &str) -> EngineResult<Option<Game>>;
    async fn list(&self) -> EngineResult<Vec<Game>>;
}

pub struct MongoGameCatalog {
    collection: Collection<Document>,
}

impl MongoGameCatalog {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(GAMES_COLLECTION),
        }
    }

    /// Inserts `games` when the collection is still empty. Returns how many
    /// were written.
    pub async fn seed_if_empty(&self, games: &[Game]) -> EngineResult<usize> {
        if games.is_empty() || self.collection.count_documents(doc! {}).await? > 0 {
            return Ok(0);
        }

        let documents = games
            .iter()
            .map(to_document)
            .collect::<EngineResult<Vec<_>>>()?;
        self.collection.insert_many(documents).await?;
        tracing::info!("Seeded {} games into {}", games.len(), GAMES_COLLECTION);
        Ok(games.len())
    }
}

/// Stores the game id as `_id`.
fn to_document(game: &Game) -> EngineResult<Document> {
    let mut document = mongodb::bson::to_document(game)
        .map_err(|e| EngineError::storage(format!("Failed to encode game {}: {}", game.id, e)))?;
    document.remove("id");
    document.insert("_id", game.id.as_str());
    Ok(document)
}

fn from_document(document: Document) -> EngineResult<Game> {
    mongodb::bson::from_document(document)
        .map_err(|e| EngineError::storage(format!("Malformed game document: {}", e)))
}

#[async_trait]
impl GameCatalog for MongoGameCatalog {
    async fn get(&self, game_id: &str) -> EngineResult<Option<Game>> {
        track_store_operation("find_one", GAMES_COLLECTION, async {
            self.collection
                .find_one(doc! { "_id": game_id })
                .await?
                .map(from_document)
                .transpose()
        })
        .await
    }

    async fn list(&self) -> EngineResult<Vec<Game>> {
        track_store_operation("find", GAMES_COLLECTION, async {
            let documents: Vec<Document> = self.collection.find(doc! {}).await?.try_collect().await?;
            documents.into_iter().map(from_document).collect()
        })
        .await
    }
}

/// Reads a JSON array of games and checks each is playable.
pub fn load_games_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<Game>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read games file {}", path.display()))?;
    let games: Vec<Game> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse games file {}", path.display()))?;

    for game in &games {
        validate_game(game).with_context(|| format!("Invalid game '{}'", game.id))?;
    }
    Ok(games)
}

/// Level ids must be unique and start at 1 so that unlocking reaches every
/// level.
pub fn validate_game(game: &Game) -> EngineResult<()> {
    if game.id.trim().is_empty() {
        return Err(EngineError::validation("game id must not be empty"));
    }
    let mut ids: Vec<u32> = game.levels.iter().map(|level| level.id).collect();
    ids.sort_unstable();
    let expected: Vec<u32> = (1..=ids.len() as u32).collect();
    if ids != expected {
        return Err(EngineError::validation(format!(
            "level ids must be 1..={} without gaps, got {:?}",
            ids.len(),
            ids
        )));
    }
    for level in &game.levels {
        let total = level
            .challenges
            .iter()
            .try_fold(0u32, |total, challenge| total.checked_add(challenge.points));
        if total.is_none() {
            return Err(EngineError::validation(format!(
                "points of level {} exceed {}",
                level.id,
                u32::MAX
            )));
        }
    }
    Ok(())
}
