// Credential store capability

pub mod postgres;

pub use postgres::PgCredentialStore;

use crate::core::errors::IdentityError;
use crate::core::models::{Rights, UserRecord, ValidationTicket, ADMIN};
use async_trait::async_trait;
use uuid::Uuid;

/// Result of the single round-trip uniqueness probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExistenceCheck {
    pub username_taken: bool,
    pub email_taken: bool,
}

/// Edit applied to a user's rights inside a single store transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RightsChange {
    Replace(Rights),
    Grant(String),
    Revoke(String),
}

impl RightsChange {
    pub fn apply(&self, current: &Rights) -> Rights {
        match self {
            RightsChange::Replace(rights) => rights.clone(),
            RightsChange::Grant(right) => {
                let mut rights = current.clone();
                rights.grant(right);
                rights
            }
            RightsChange::Revoke(right) => {
                let mut rights = current.clone();
                rights.revoke(right);
                rights
            }
        }
    }
}

/// Resolve `change` against a locked view of the user's rights
///
/// `other_admins` counts administrators other than this user, read under the
/// same lock. Refuses an empty result and the removal of the last `admin`.
pub fn resolve_rights_change(
    current: &Rights,
    change: &RightsChange,
    other_admins: i64,
) -> Result<Rights, IdentityError> {
    let updated = change.apply(current);
    if updated.is_empty() {
        return Err(IdentityError::Validation("rights must not be empty".to_string()));
    }
    if current.has(ADMIN) && !updated.has(ADMIN) && other_admins == 0 {
        return Err(IdentityError::Validation(
            "cannot remove admin from the last administrator".to_string(),
        ));
    }
    Ok(updated)
}

/// Durable user and validation-ticket storage
///
/// `check_exists` is an optimization only: `create` must still reject
/// collisions with `ConstraintViolation` through the store's own constraints.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn check_exists(&self, username: &str, email: &str) -> Result<ExistenceCheck, IdentityError>;

    /// Insert a new user with the default rights, not email-validated
    async fn create(&self, username: &str, email: &str, password_hash: &[u8]) -> Result<UserRecord, IdentityError>;

    async fn lookup(&self, username: &str) -> Result<UserRecord, IdentityError>;

    /// Apply `change` atomically and return the resulting set
    ///
    /// The read, the last-administrator check and the write happen under one
    /// lock, so concurrent edits neither lose rights nor demote every admin.
    async fn change_rights(&self, username: &str, change: &RightsChange) -> Result<Rights, IdentityError>;

    /// Full replace of the user's rights
    async fn update_rights(&self, username: &str, rights: &Rights) -> Result<(), IdentityError> {
        self.change_rights(username, &RightsChange::Replace(rights.clone()))
            .await
            .map(|_| ())
    }

    /// Users strictly after `after` in lexical order; `limit <= 0` is unbounded
    async fn list(&self, after: &str, limit: i64) -> Result<Vec<UserRecord>, IdentityError>;

    async fn count_admins(&self) -> Result<i64, IdentityError>;

    /// Replace any outstanding ticket for `username` with a new one
    async fn create_validation_ticket(&self, username: &str) -> Result<ValidationTicket, IdentityError>;

    /// Resolve, mark the user validated and delete the ticket in one step.
    /// Returns the validated username.
    async fn consume_validation_ticket(&self, ticket_id: &Uuid) -> Result<String, IdentityError>;

    async fn ping(&self) -> Result<(), IdentityError>;

    /// Close backend connections. Safe to call more than once.
    async fn shutdown(&self);
}
