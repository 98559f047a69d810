// Session cache capability

pub mod redis_store;

pub use redis_store::RedisSessionCache;

use crate::core::errors::IdentityError;
use crate::core::models::Session;
use async_trait::async_trait;

/// Expiring id -> session mapping
///
/// Sessions are never updated in place. An expired entry reads exactly like
/// an absent one.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Store `session` under a fresh random id and return it with the id set
    async fn put(&self, session: Session) -> Result<Session, IdentityError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, IdentityError>;

    /// Remove a session. Deleting an absent id is not an error.
    async fn delete(&self, id: &str) -> Result<(), IdentityError>;

    async fn ping(&self) -> Result<(), IdentityError>;
}
