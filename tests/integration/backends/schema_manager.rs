// Live schema version, upgrade and validation tests

use jutzo::core::errors::IdentityError;
use jutzo::schema::manager::{SchemaManager, SchemaVersion};
use jutzo::schema::{SUPPORTED_VERSION, UPGRADE_SCRIPTS};
use sqlx::PgPool;
use std::time::Duration;

use super::IsolatedStore;

async fn isolated() -> Option<IsolatedStore> {
    IsolatedStore::connect(Duration::from_secs(3600)).await
}

async fn run(pool: &PgPool, statement: &str) {
    sqlx::raw_sql(statement).execute(pool).await.unwrap();
}

/// Lay down the version 1 structure directly
async fn install_version_one(pool: &PgPool) {
    for statement in UPGRADE_SCRIPTS[0] {
        run(pool, statement).await;
    }
}

#[tokio::test]
async fn test_empty_schema_is_unset() {
    let Some(isolated) = isolated().await else { return };
    let manager = SchemaManager::new(isolated.store.pool().clone());

    assert_eq!(manager.current_version().await.unwrap(), SchemaVersion::Unset);
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_prepare_is_idempotent() {
    let Some(isolated) = isolated().await else { return };
    let manager = SchemaManager::new(isolated.store.pool().clone());

    assert_eq!(manager.prepare().await.unwrap(), SUPPORTED_VERSION);
    assert_eq!(manager.prepare().await.unwrap(), SUPPORTED_VERSION);
    assert_eq!(
        manager.current_version().await.unwrap(),
        SchemaVersion::Version(SUPPORTED_VERSION)
    );
    manager.validate(SUPPORTED_VERSION).await.unwrap();
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_upgrade_in_place_keeps_rows() {
    let Some(isolated) = isolated().await else { return };
    let pool = isolated.store.pool();
    let manager = SchemaManager::new(pool.clone());

    install_version_one(pool).await;
    assert_eq!(manager.current_version().await.unwrap(), SchemaVersion::Version(1));
    manager.validate(1).await.unwrap();

    run(
        pool,
        "insert into jutzo_registered_user (username, email, password_hash, rights)
         values ('alice', 'alice@example.com', '\\x00', 'login')",
    )
    .await;
    run(
        pool,
        "insert into jutzo_pending_validation (username) values ('alice')",
    )
    .await;

    assert_eq!(manager.prepare().await.unwrap(), SUPPORTED_VERSION);

    let users: i64 = sqlx::query_scalar("select count(*) from jutzo_registered_user where username = 'alice'")
        .fetch_one(pool)
        .await
        .unwrap();
    let tickets: i64 = sqlx::query_scalar("select count(*) from jutzo_pending_validation")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(users, 1);
    assert_eq!(tickets, 1);
    assert_eq!(
        manager.current_version().await.unwrap(),
        SchemaVersion::Version(SUPPORTED_VERSION)
    );
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_failing_statement_aborts_upgrade() {
    let Some(isolated) = isolated().await else { return };
    let pool = isolated.store.pool();
    let manager = SchemaManager::new(pool.clone());

    install_version_one(pool).await;
    // The 1 -> 2 script alters this table first
    run(pool, "drop table jutzo_pending_validation").await;

    match manager.upgrade(1).await {
        Err(IdentityError::SchemaMismatch(msg)) => assert!(msg.contains("statement 0"), "{}", msg),
        other => panic!("Expected SchemaMismatch, got {:?}", other),
    }
    // The ordinal bump after the failing statement never ran
    assert_eq!(manager.current_version().await.unwrap(), SchemaVersion::Version(1));
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_newer_store_rejected() {
    let Some(isolated) = isolated().await else { return };
    let pool = isolated.store.pool();
    let manager = SchemaManager::new(pool.clone());

    manager.prepare().await.unwrap();
    run(pool, "update jutzo_database_info set schema_ordinal = 99").await;

    assert!(matches!(manager.prepare().await, Err(IdentityError::SchemaMismatch(_))));
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_validate_reports_drift() {
    let Some(isolated) = isolated().await else { return };
    let pool = isolated.store.pool();
    let manager = SchemaManager::new(pool.clone());

    manager.prepare().await.unwrap();
    run(pool, "alter table jutzo_registered_user add column nickname text").await;

    match manager.validate(SUPPORTED_VERSION).await {
        Err(IdentityError::SchemaMismatch(msg)) => {
            assert!(msg.contains("unexpected column jutzo_registered_user.nickname"), "{}", msg)
        }
        other => panic!("Expected SchemaMismatch, got {:?}", other),
    }
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_other_schemas_are_ignored() {
    let Some(first) = isolated().await else { return };
    let Some(second) = isolated().await else { return };
    let manager = SchemaManager::new(first.store.pool().clone());
    manager.prepare().await.unwrap();

    // Same table names, different layout, in a sibling schema
    install_version_one(second.store.pool()).await;
    run(second.store.pool(), "create table jutzo_stray (id integer)").await;

    manager.validate(SUPPORTED_VERSION).await.unwrap();
    assert_eq!(
        manager.current_version().await.unwrap(),
        SchemaVersion::Version(SUPPORTED_VERSION)
    );
    first.cleanup().await;
    second.cleanup().await;
}
