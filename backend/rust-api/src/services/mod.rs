use std::sync::Arc;

use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use game_catalog::{load_games_file, GameCatalog, MongoGameCatalog};
use memory::{
    InMemoryGameCatalog, InMemoryProgressRepository, InMemoryQuestionStore, InMemoryResultStore,
    InMemorySessionStore,
};
use path_predictor::{HttpPredictor, PathPredictor, Predictor};
use progress_store::{MongoProgressRepository, ProgressRepository, ProgressStore};
use question_sampler::{MongoQuestionStore, QuestionSampler, QuestionStore};
use result_recorder::{MongoResultStore, ResultRecorder, ResultStore};
use session_service::SessionService;
use session_store::{RedisSessionStore, SessionStore};

use crate::utils::retry::RetryConfig;

/// Storage and upstream implementations the services are built from.
pub struct Capabilities {
    pub sessions: Arc<dyn SessionStore>,
    pub catalog: Arc<dyn GameCatalog>,
    pub progress: Arc<dyn ProgressRepository>,
    pub questions: Arc<dyn QuestionStore>,
    pub results: Arc<dyn ResultStore>,
    pub predictor: Arc<dyn Predictor>,
}

pub struct AppState {
    pub config: Config,
    /// Present with the `mongo` backend; used by health checks.
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
    pub catalog: Arc<dyn GameCatalog>,
    pub progress: ProgressStore,
    pub predictor: PathPredictor,
    pub sampler: QuestionSampler,
    pub recorder: ResultRecorder,
    pub sessions: Arc<SessionService>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let catalog = MongoGameCatalog::new(&mongo);
        if let Some(path) = &config.games_file {
            let games = load_games_file(path)?;
            catalog.seed_if_empty(&games).await?;
        }

        let capabilities = Capabilities {
            sessions: Arc::new(RedisSessionStore::new(redis.clone(), config.session_ttl_secs)),
            catalog: Arc::new(catalog),
            progress: Arc::new(MongoProgressRepository::new(&mongo)),
            questions: Arc::new(MongoQuestionStore::new(&mongo)),
            results: Arc::new(MongoResultStore::new(&mongo)),
            predictor: Arc::new(HttpPredictor::new(
                config.predictor_url.clone(),
                config.predictor_timeout(),
            )?),
        };

        Ok(Self::from_parts(config, capabilities, Some(mongo), Some(redis)))
    }

    /// Everything in process memory. Games come from `config.games_file`;
    /// the question bank starts empty.
    pub fn in_memory(config: Config) -> anyhow::Result<Self> {
        let games = match &config.games_file {
            Some(path) => load_games_file(path)?,
            None => Vec::new(),
        };
        tracing::info!("In-memory backend with {} games", games.len());

        let capabilities = Capabilities {
            sessions: Arc::new(InMemorySessionStore::default()),
            catalog: Arc::new(InMemoryGameCatalog::new(games)),
            progress: Arc::new(InMemoryProgressRepository::default()),
            questions: Arc::new(InMemoryQuestionStore::default()),
            results: Arc::new(InMemoryResultStore::default()),
            predictor: Arc::new(HttpPredictor::new(
                config.predictor_url.clone(),
                config.predictor_timeout(),
            )?),
        };

        Ok(Self::from_parts(config, capabilities, None, None))
    }

    pub fn from_parts(
        config: Config,
        capabilities: Capabilities,
        mongo: Option<Database>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let retry = RetryConfig::default();
        let progress = ProgressStore::new(capabilities.progress, retry.clone());
        let predictor = PathPredictor::new(capabilities.predictor, config.predictor_timeout());
        let sampler = QuestionSampler::new(
            capabilities.questions,
            config.store_timeout(),
            config.quiz.clone(),
        );
        let recorder = ResultRecorder::new(capabilities.results, retry);

        let sessions = Arc::new(SessionService::new(
            capabilities.sessions,
            capabilities.catalog.clone(),
            progress.clone(),
            predictor.clone(),
            sampler.clone(),
            recorder.clone(),
            config.quiz.clone(),
            config.display_interval(),
        ));

        Self {
            config,
            mongo,
            redis,
            catalog: capabilities.catalog,
            progress,
            predictor,
            sampler,
            recorder,
            sessions,
        }
    }
}

pub mod game_catalog;
pub mod memory;
pub mod path_predictor;
pub mod progress_store;
pub mod question_sampler;
pub mod result_recorder;
pub mod score_gate;
pub mod session_engine;
pub mod session_service;
pub mod session_store;
