use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::error::{EngineError, EngineResult};
use crate::metrics::track_store_operation;
use crate::models::session::SessionRecord;

const SESSION_KEY_PREFIX: &str = "quiz_session";

pub fn session_key(session_id: &str) -> String {
    format!("{}:{}", SESSION_KEY_PREFIX, session_id)
}

/// Live session snapshots, addressed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> EngineResult<Option<SessionRecord>>;
    async fn save(&self, record: &SessionRecord) -> EngineResult<()>;
    async fn delete(&self, session_id: &str) -> EngineResult<()>;
}

pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: &str) -> EngineResult<Option<SessionRecord>> {
        let mut conn = self.redis.clone();
        let key = session_key(session_id);

        let raw: Option<String> = track_store_operation("get", SESSION_KEY_PREFIX, async {
            Ok(redis::cmd("GET").arg(&key).query_async(&mut conn).await?)
        })
        .await?;

        raw.map(|json| serde_json::from_str::<SessionRecord>(&json).map_err(EngineError::from))
            .transpose()
    }

    async fn save(&self, record: &SessionRecord) -> EngineResult<()> {
        let mut conn = self.redis.clone();
        let key = session_key(&record.id);
        let json = serde_json::to_string(record)?;

        track_store_operation("setex", SESSION_KEY_PREFIX, async {
            redis::cmd("SETEX")
                .arg(&key)
                .arg(self.ttl_secs)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, session_id: &str) -> EngineResult<()> {
        let mut conn = self.redis.clone();
        let key = session_key(session_id);

        track_store_operation("del", SESSION_KEY_PREFIX, async {
            redis::cmd("DEL").arg(&key).query_async::<()>(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
