use serde::Deserialize;
use std::{env, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = config::ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            other => Err(config::ConfigError::Message(format!(
                "unknown storage backend '{}' (expected mongo or memory)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizSettings {
    /// Quiz ids accepted by the fixed-size batch endpoint.
    pub allowed_quiz_ids: Vec<String>,
    pub batch_size: usize,
    pub adaptive_points_per_question: u32,
    /// Share of the maximum score needed to pass an adaptive session.
    pub adaptive_pass_ratio: f64,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            allowed_quiz_ids: vec!["quiz1".to_string(), "quiz2".to_string()],
            batch_size: 5,
            adaptive_points_per_question: 10,
            adaptive_pass_ratio: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub bind_addr: String,
    pub storage_backend: StorageBackend,
    /// Optional JSON file with the game catalog, loaded into the in-memory
    /// catalog (and seeded into Mongo when the collection is empty).
    pub games_file: Option<String>,
    pub predictor_url: String,
    pub predictor_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub display_interval_ms: u64,
    pub session_ttl_secs: u64,
    pub metrics_auth: String,
    pub quiz: QuizSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "quizpath".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            bind_addr: "0.0.0.0:8081".to_string(),
            storage_backend: StorageBackend::Mongo,
            games_file: None,
            predictor_url: "http://localhost:5000/predict".to_string(),
            predictor_timeout_ms: 3000,
            store_timeout_ms: 2000,
            display_interval_ms: 1500,
            session_ttl_secs: 4 * 60 * 60,
            metrics_auth: "admin:changeme".to_string(),
            quiz: QuizSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let string = |key: &str, fallback_env: &str, default: &str| -> String {
            settings
                .get_string(key)
                .or_else(|_| env::var(fallback_env))
                .unwrap_or_else(|_| default.to_string())
        };
        let number = |key: &str, fallback_env: &str, default: u64| -> u64 {
            settings
                .get_int(key)
                .ok()
                .and_then(|value| u64::try_from(value).ok())
                .or_else(|| env::var(fallback_env).ok().and_then(|v| v.parse().ok()))
                .unwrap_or(default)
        };

        let storage_backend = string("storage.backend", "STORAGE_BACKEND", "mongo").parse()?;

        let games_file = settings
            .get_string("storage.games_file")
            .or_else(|_| env::var("GAMES_FILE"))
            .ok()
            .filter(|path| !path.trim().is_empty());

        let predictor_url = string(
            "predictor.url",
            "PREDICTOR_URL",
            &defaults.predictor_url,
        );
        url::Url::parse(&predictor_url).map_err(|e| {
            config::ConfigError::Message(format!("invalid predictor url '{}': {}", predictor_url, e))
        })?;

        let quiz_defaults = QuizSettings::default();
        let allowed_quiz_ids = settings
            .get_array("quiz.allowed_quiz_ids")
            .ok()
            .map(|values| {
                values
                    .into_iter()
                    .filter_map(|value| value.into_string().ok())
                    .collect::<Vec<_>>()
            })
            .or_else(|| {
                env::var("ALLOWED_QUIZ_IDS").ok().map(|raw| {
                    raw.split(',')
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .collect()
                })
            })
            .unwrap_or(quiz_defaults.allowed_quiz_ids);

        let adaptive_pass_ratio = settings
            .get_float("quiz.adaptive_pass_ratio")
            .unwrap_or(quiz_defaults.adaptive_pass_ratio);
        if !(0.0..=1.0).contains(&adaptive_pass_ratio) {
            return Err(config::ConfigError::Message(format!(
                "quiz.adaptive_pass_ratio must be within 0..=1, got {}",
                adaptive_pass_ratio
            )));
        }

        let quiz = QuizSettings {
            allowed_quiz_ids,
            batch_size: number("quiz.batch_size", "QUIZ_BATCH_SIZE", quiz_defaults.batch_size as u64)
                as usize,
            adaptive_points_per_question: number(
                "quiz.adaptive_points_per_question",
                "ADAPTIVE_POINTS_PER_QUESTION",
                u64::from(quiz_defaults.adaptive_points_per_question),
            ) as u32,
            adaptive_pass_ratio,
        };

        Ok(Config {
            mongo_uri: string("database.mongo_uri", "MONGO_URI", &defaults.mongo_uri),
            mongo_database: string(
                "database.mongo_database",
                "MONGO_DATABASE",
                &defaults.mongo_database,
            ),
            redis_uri: string("redis.uri", "REDIS_URI", &defaults.redis_uri),
            bind_addr: string("server.bind_addr", "BIND_ADDR", &defaults.bind_addr),
            storage_backend,
            games_file,
            predictor_url,
            predictor_timeout_ms: number(
                "predictor.timeout_ms",
                "PREDICTOR_TIMEOUT_MS",
                defaults.predictor_timeout_ms,
            ),
            store_timeout_ms: number(
                "storage.timeout_ms",
                "STORE_TIMEOUT_MS",
                defaults.store_timeout_ms,
            ),
            display_interval_ms: number(
                "session.display_interval_ms",
                "DISPLAY_INTERVAL_MS",
                defaults.display_interval_ms,
            ),
            session_ttl_secs: number(
                "session.ttl_secs",
                "SESSION_TTL_SECS",
                defaults.session_ttl_secs,
            ),
            metrics_auth: string("metrics.auth", "METRICS_AUTH", &defaults.metrics_auth),
            quiz,
        })
    }

    pub fn predictor_timeout(&self) -> Duration {
        Duration::from_millis(self.predictor_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_millis(self.display_interval_ms)
    }
}
