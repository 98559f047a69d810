// Redis-backed session cache

use super::SessionCache;
use crate::core::errors::IdentityError;
use crate::core::models::Session;
use crate::utils::{fingerprint, generate_session_id, redact_url};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Key namespace for session entries
pub const KEY_PREFIX: &str = "jutzo:session:";

/// Session cache storing JSON session records with a native TTL
pub struct RedisSessionCache {
    connection_manager: ConnectionManager,
    timeout: Duration,
}

impl RedisSessionCache {
    /// Connect to `redis_url`, bounding connection setup and every command by `timeout`
    pub async fn new(redis_url: &str, timeout: Duration) -> Result<Self, IdentityError> {
        validate_scheme(redis_url)?;

        let client = Client::open(redis_url).map_err(|e| {
            IdentityError::Configuration(format!(
                "Invalid Redis URL '{}': {}",
                redact_url(redis_url),
                e
            ))
        })?;

        let connection_manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                IdentityError::BackendUnavailable(format!(
                    "Redis connection to {} timed out after {:?}",
                    redact_url(redis_url),
                    timeout
                ))
            })??;

        let cache = Self {
            connection_manager,
            timeout,
        };
        cache.ping().await?;

        info!(redis = %redact_url(redis_url), "Connected to Redis");
        Ok(cache)
    }

    fn key(id: &str) -> String {
        format!("{}{}", KEY_PREFIX, id)
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| {
                IdentityError::BackendUnavailable(format!("Redis {} failed: {}", operation, e))
            }),
            Err(_) => Err(IdentityError::BackendUnavailable(format!(
                "Redis {} timed out after {:?}",
                operation, self.timeout
            ))),
        }
    }
}

/// Only `redis://` and `rediss://` URLs are accepted
fn validate_scheme(redis_url: &str) -> Result<(), IdentityError> {
    let parsed = url::Url::parse(redis_url).map_err(|e| {
        IdentityError::Configuration(format!("Invalid Redis URL '{}': {}", redact_url(redis_url), e))
    })?;
    match parsed.scheme() {
        "redis" | "rediss" => Ok(()),
        other => Err(IdentityError::Configuration(format!(
            "Unsupported Redis URL scheme '{}'",
            other
        ))),
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn put(&self, mut session: Session) -> Result<Session, IdentityError> {
        let ttl = session.remaining_secs_at(Utc::now());
        if ttl == 0 {
            return Err(IdentityError::Validation("session already expired".to_string()));
        }

        session.id = generate_session_id();
        let payload = serde_json::to_string(&session).map_err(|e| {
            IdentityError::BackendUnavailable(format!("Failed to serialize session: {}", e))
        })?;

        let mut conn = self.connection_manager.clone();
        let key = Self::key(&session.id);
        self.bounded("SET", conn.set_ex::<_, _, ()>(&key, payload, ttl))
            .await?;

        debug!(
            username = %session.username(),
            session = %fingerprint(&session.id),
            ttl_secs = ttl,
            "Session stored"
        );
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, IdentityError> {
        let mut conn = self.connection_manager.clone();
        let key = Self::key(id);
        let payload: Option<String> = self.bounded("GET", conn.get(&key)).await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let session: Session = serde_json::from_str(&payload).map_err(|e| {
            IdentityError::BackendUnavailable(format!("Failed to deserialize session: {}", e))
        })?;

        // The native TTL is authoritative; this guards against clock skew on the server
        if session.is_expired_at(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn delete(&self, id: &str) -> Result<(), IdentityError> {
        let mut conn = self.connection_manager.clone();
        let key = Self::key(id);
        let removed: i64 = self.bounded("DEL", conn.del(&key)).await?;

        debug!(session = %fingerprint(id), removed, "Session deleted");
        Ok(())
    }

    async fn ping(&self) -> Result<(), IdentityError> {
        let mut conn = self.connection_manager.clone();
        let response: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(IdentityError::BackendUnavailable(format!(
                "Redis ping returned unexpected response: {}",
                response
            )))
        }
    }
}
