// Live Redis tests
//
// Run only when JUTZO_TEST_REDIS_URL is set.

use chrono::Utc;
use jutzo::core::models::{Rights, Session, UserRecord, SESSION_DURATION_SECS};
use jutzo::state::redis_store::KEY_PREFIX;
use jutzo::state::{RedisSessionCache, SessionCache};
use redis::AsyncCommands;
use std::time::Duration;

fn user() -> UserRecord {
    UserRecord {
        username: "redis-it".to_string(),
        email: "redis-it@example.com".to_string(),
        email_validated: true,
        rights: Rights::parse("login,blog"),
        password_hash: Vec::new(),
        creation_time: Utc::now(),
    }
}

#[tokio::test]
async fn test_session_lifecycle_and_ttl() {
    let Ok(url) = std::env::var("JUTZO_TEST_REDIS_URL") else { return };
    let cache = RedisSessionCache::new(&url, Duration::from_secs(2)).await.unwrap();

    let stored = cache.put(Session::for_user(&user())).await.unwrap();
    let loaded = cache.get(&stored.id).await.unwrap().unwrap();
    assert_eq!(loaded.username(), "redis-it");
    assert_eq!(loaded.rights(), &Rights::parse("blog,login"));

    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let ttl: i64 = conn.ttl(format!("{}{}", KEY_PREFIX, stored.id)).await.unwrap();
    assert!(ttl > 0 && ttl <= SESSION_DURATION_SECS as i64);

    cache.delete(&stored.id).await.unwrap();
    cache.delete(&stored.id).await.unwrap();
    assert!(cache.get(&stored.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_session_is_none() {
    let Ok(url) = std::env::var("JUTZO_TEST_REDIS_URL") else { return };
    let cache = RedisSessionCache::new(&url, Duration::from_secs(2)).await.unwrap();

    assert!(cache.get("0000000000000000").await.unwrap().is_none());
    cache.ping().await.unwrap();
}

#[tokio::test]
async fn test_bad_scheme_is_configuration_error() {
    let result = RedisSessionCache::new("http://localhost:6379", Duration::from_secs(1)).await;
    assert!(matches!(
        result,
        Err(jutzo::core::errors::IdentityError::Configuration(_))
    ));
}
