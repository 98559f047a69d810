// Live Postgres tests
//
// Run only when JUTZO_TEST_DB_URL points at a disposable database. Each test
// works inside a schema of its own.

use jutzo::auth::password::{hash_password, MIN_COST};
use jutzo::core::errors::{ConstraintField, IdentityError};
use jutzo::core::models::Rights;
use jutzo::schema::SchemaManager;
use jutzo::store::{CredentialStore, PgCredentialStore, RightsChange};
use std::time::Duration;

use super::IsolatedStore;

async fn prepared(ticket_ttl: Duration) -> Option<IsolatedStore> {
    let isolated = IsolatedStore::connect(ticket_ttl).await?;
    SchemaManager::new(isolated.store.pool().clone())
        .prepare()
        .await
        .ok()?;
    Some(isolated)
}

async fn seed(store: &PgCredentialStore, username: &str) {
    let hash = hash_password("pw1", MIN_COST).unwrap();
    store
        .create(username, &format!("{}@example.com", username), &hash)
        .await
        .unwrap();
}

async fn pending_tickets(store: &PgCredentialStore, username: &str) -> i64 {
    sqlx::query_scalar("SELECT count(*) FROM jutzo_pending_validation WHERE username = $1")
        .bind(username)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_lookup_and_constraints() {
    let Some(isolated) = prepared(Duration::from_secs(3600)).await else { return };
    let store = &isolated.store;
    let hash = hash_password("pw1", MIN_COST).unwrap();

    let created = store.create("alice", "alice@example.com", &hash).await.unwrap();
    assert_eq!(created.rights, Rights::default_for_new_user());
    assert!(!created.email_validated);

    let loaded = store.lookup("alice").await.unwrap();
    assert_eq!(loaded.password_hash, hash);

    let exists = store.check_exists("alice", "nobody@example.com").await.unwrap();
    assert!(exists.username_taken);
    assert!(!exists.email_taken);

    let dup_name = store.create("alice", "other@example.com", &hash).await;
    assert!(matches!(
        dup_name,
        Err(IdentityError::ConstraintViolation(ConstraintField::Username))
    ));

    let dup_email = store.create("bob", "alice@example.com", &hash).await;
    assert!(matches!(
        dup_email,
        Err(IdentityError::ConstraintViolation(ConstraintField::Email))
    ));

    let missing = store.lookup("ghost").await;
    assert!(matches!(missing, Err(IdentityError::NotFound(_))));
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_ticket_flow() {
    let Some(isolated) = prepared(Duration::from_secs(3600)).await else { return };
    let store = &isolated.store;
    seed(store, "alice").await;

    let first = store.create_validation_ticket("alice").await.unwrap();
    let second = store.create_validation_ticket("alice").await.unwrap();
    assert_eq!(pending_tickets(store, "alice").await, 1);

    let stale = store.consume_validation_ticket(&first.id).await;
    assert!(matches!(stale, Err(IdentityError::NotFound(_))));

    assert_eq!(store.consume_validation_ticket(&second.id).await.unwrap(), "alice");
    assert!(store.lookup("alice").await.unwrap().email_validated);

    let replay = store.consume_validation_ticket(&second.id).await;
    assert!(matches!(replay, Err(IdentityError::NotFound(_))));
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_expired_ticket_is_not_found() {
    let Some(isolated) = prepared(Duration::from_secs(1)).await else { return };
    let store = &isolated.store;
    seed(store, "alice").await;

    let ticket = store.create_validation_ticket("alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let result = store.consume_validation_ticket(&ticket.id).await;
    assert!(matches!(result, Err(IdentityError::NotFound(_))));
    assert!(!store.lookup("alice").await.unwrap().email_validated);
    assert_eq!(pending_tickets(store, "alice").await, 0);
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_issuing_sweeps_expired_tickets() {
    let Some(isolated) = prepared(Duration::from_secs(1)).await else { return };
    let store = &isolated.store;
    seed(store, "alice").await;
    seed(store, "bob").await;

    store.create_validation_ticket("alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    store.create_validation_ticket("bob").await.unwrap();

    assert_eq!(pending_tickets(store, "alice").await, 0);
    assert_eq!(pending_tickets(store, "bob").await, 1);
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_rights_listing_and_admin_count() {
    let Some(isolated) = prepared(Duration::from_secs(3600)).await else { return };
    let store = &isolated.store;
    seed(store, "bob").await;
    seed(store, "alice").await;

    store
        .update_rights("alice", &Rights::parse("login,admin"))
        .await
        .unwrap();
    assert_eq!(store.count_admins().await.unwrap(), 1);

    let page = store.list("", 0).await.unwrap();
    let names: Vec<&str> = page.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);
    assert!(page.iter().all(|u| u.password_hash.is_empty()));
    assert!(page[0].rights.has("admin"));
    assert!(store.list("bob", 10).await.unwrap().is_empty());

    let demote = store.update_rights("alice", &Rights::parse("login")).await;
    assert!(matches!(demote, Err(IdentityError::Validation(_))));
    assert_eq!(store.count_admins().await.unwrap(), 1);

    let missing = store.update_rights("ghost", &Rights::parse("login")).await;
    assert!(matches!(missing, Err(IdentityError::NotFound(_))));
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_concurrent_demotions_keep_one_admin() {
    let Some(isolated) = prepared(Duration::from_secs(3600)).await else { return };
    let store = &isolated.store;
    for name in ["alice", "bob"] {
        seed(store, name).await;
        store
            .update_rights(name, &Rights::parse("login,admin"))
            .await
            .unwrap();
    }

    let revoke = RightsChange::Revoke("admin".to_string());
    let (first, second) = tokio::join!(
        store.change_rights("alice", &revoke),
        store.change_rights("bob", &revoke),
    );

    let refused = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(IdentityError::Validation(_))))
        .count();
    assert_eq!(refused, 1, "exactly one demotion must be refused: {:?} {:?}", first, second);
    assert_eq!(store.count_admins().await.unwrap(), 1);
    isolated.cleanup().await;
}

#[tokio::test]
async fn test_concurrent_grants_are_not_lost() {
    let Some(isolated) = prepared(Duration::from_secs(3600)).await else { return };
    let store = &isolated.store;
    seed(store, "alice").await;

    let grant_blog = RightsChange::Grant("blog".to_string());
    let grant_wiki = RightsChange::Grant("wiki".to_string());
    let (blog, wiki) = tokio::join!(
        store.change_rights("alice", &grant_blog),
        store.change_rights("alice", &grant_wiki),
    );
    blog.unwrap();
    wiki.unwrap();

    assert_eq!(
        store.lookup("alice").await.unwrap().rights,
        Rights::parse("login,blog,wiki")
    );
    isolated.cleanup().await;
}
