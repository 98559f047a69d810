// Token resolution, rights checks, isolation and logoff

use chrono::Utc;
use jutzo::core::errors::IdentityError;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::super::common::*;

#[tokio::test]
async fn test_token_resolves_to_session() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;

    let session = h.engine.login("alice", "pw1").await.unwrap();
    let token = h.engine.issue_token(&session).unwrap();

    let resolved = h.engine.require_session(&token).await.unwrap();
    assert_eq!(resolved.id, session.id);
    assert_eq!(resolved.username(), "alice");
    assert!(resolved.user.password_hash.is_empty());
}

#[tokio::test]
async fn test_token_expiry_matches_session() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;

    let session = h.engine.login("alice", "pw1").await.unwrap();
    let token = h.engine.issue_token(&session).unwrap();
    let claims = h.engine.codec().decode_claims(&token).unwrap();

    let drift = claims.exp as i64 - session.expires_at().timestamp();
    assert!(drift.abs() <= 1, "token exp drifts {}s from session expiry", drift);
}

#[tokio::test]
async fn test_rights_are_and_checked() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;
    let session = h.engine.login("alice", "pw1").await.unwrap();

    assert!(h.engine.require_rights(&session, &["login"]).is_ok());
    assert!(h.engine.require_rights::<&str>(&session, &[]).is_ok());

    match h.engine.require_rights(&session, &["login", "admin"]) {
        Err(IdentityError::Forbidden { missing }) => assert_eq!(missing, vec!["admin".to_string()]),
        other => panic!("Expected Forbidden, got {:?}", other),
    }
}

#[tokio::test]
async fn test_session_isolation_from_later_grants() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;

    let before = h.engine.login("alice", "pw1").await.unwrap();
    let token = h.engine.issue_token(&before).unwrap();

    h.engine.grant_right("alice", "admin").await.unwrap();

    let live = h.engine.require_session(&token).await.unwrap();
    assert!(h.engine.require_rights(&live, &["admin"]).is_err());

    // Takes effect on the next login
    let after = h.engine.login("alice", "pw1").await.unwrap();
    assert!(h.engine.require_rights(&after, &["admin"]).is_ok());
}

#[tokio::test]
async fn test_logoff_is_idempotent() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;
    let session = h.engine.login("alice", "pw1").await.unwrap();
    let token = h.engine.issue_token(&session).unwrap();

    h.engine.logoff(&session.id).await.unwrap();
    h.engine.logoff(&session.id).await.unwrap();
    h.engine.logoff("never-existed").await.unwrap();

    assert!(matches!(h.engine.require_session(&token).await, Err(IdentityError::Unauthorized)));
}

#[tokio::test]
async fn test_expired_session_is_unauthorized() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;
    let session = h.engine.login("alice", "pw1").await.unwrap();
    let token = h.engine.issue_token(&session).unwrap();

    h.cache.expire(&session.id);

    assert!(matches!(h.engine.require_session(&token).await, Err(IdentityError::Unauthorized)));
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;
    let session = h.engine.login("alice", "pw1").await.unwrap();

    let stale = h
        .engine
        .codec()
        .encode_at(
            "alice",
            &session.id,
            Utc::now() - chrono::Duration::seconds(10),
            Duration::from_secs(5),
        )
        .unwrap();

    assert!(matches!(h.engine.require_session(&stale).await, Err(IdentityError::Unauthorized)));
}

#[tokio::test]
async fn test_token_for_other_subject_rejected() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;
    let session = h.engine.login("alice", "pw1").await.unwrap();

    let borrowed = h
        .engine
        .codec()
        .encode("mallory", &session.id, Duration::from_secs(60))
        .unwrap();

    assert!(matches!(h.engine.require_session(&borrowed).await, Err(IdentityError::Unauthorized)));
}

#[tokio::test]
async fn test_cache_failure_is_unauthorized() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;
    let session = h.engine.login("alice", "pw1").await.unwrap();
    let token = h.engine.issue_token(&session).unwrap();

    h.cache.get_should_fail.store(true, Ordering::SeqCst);
    assert!(matches!(h.engine.require_session(&token).await, Err(IdentityError::Unauthorized)));
}

#[tokio::test]
async fn test_garbage_token_is_unauthorized() {
    let h = harness().await;
    assert!(matches!(h.engine.require_session("garbage").await, Err(IdentityError::Unauthorized)));
}

#[tokio::test]
async fn test_each_login_gets_a_fresh_session() {
    let h = harness().await;
    active_user(&h, "alice", "pw1").await;

    let a = h.engine.login("alice", "pw1").await.unwrap();
    let b = h.engine.login("alice", "pw1").await.unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(h.cache.len(), 2);
}
