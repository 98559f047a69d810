// Core data models for users, rights, sessions and validation tickets

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Right required to log in once the email address is validated
pub const LOGIN: &str = "login";

/// Administrative right; bypasses the email-validation gate on login
pub const ADMIN: &str = "admin";

/// Fixed validity of a session, anchored at creation
pub const SESSION_DURATION_SECS: u64 = 8 * 60 * 60;

/// Flat set of named rights
///
/// Stored as a comma-joined string. Insertion order is kept for rendering but
/// equality is set equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rights(Vec<String>);

impl Rights {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Rights assigned to a freshly registered user
    pub fn default_for_new_user() -> Self {
        Self(vec![LOGIN.to_string()])
    }

    /// Parse the comma-joined storage form. Blank entries and duplicates are dropped.
    pub fn parse(stored: &str) -> Self {
        let mut rights = Self::new();
        for name in stored.split(',') {
            rights.grant(name);
        }
        rights
    }

    /// Render to the comma-joined storage form
    pub fn to_storage_string(&self) -> String {
        self.0.join(",")
    }

    pub fn has(&self, right: &str) -> bool {
        self.0.iter().any(|r| r == right)
    }

    pub fn has_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|r| self.has(r.as_ref()))
    }

    pub fn has_any<S: AsRef<str>>(&self, candidates: &[S]) -> bool {
        candidates.iter().any(|r| self.has(r.as_ref()))
    }

    /// Rights from `required` that this set does not hold
    pub fn missing<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        required
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| !self.has(r))
            .map(str::to_string)
            .collect()
    }

    /// Add a right. Returns false when it was already present.
    pub fn grant(&mut self, right: &str) -> bool {
        let right = right.trim();
        if right.is_empty() || self.has(right) {
            return false;
        }
        self.0.push(right.to_string());
        true
    }

    /// Remove a right. Returns false when it was absent.
    pub fn revoke(&mut self, right: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|r| r != right);
        self.0.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl PartialEq for Rights {
    fn eq(&self, other: &Self) -> bool {
        let lhs: BTreeSet<&str> = self.iter().collect();
        let rhs: BTreeSet<&str> = other.iter().collect();
        lhs == rhs
    }
}

impl Eq for Rights {}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_string())
    }
}

impl<S: AsRef<str>> FromIterator<S> for Rights {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut rights = Self::new();
        for right in iter {
            rights.grant(right.as_ref());
        }
        rights
    }
}

/// A registered user
///
/// The password hash never leaves the credential store: it is skipped on
/// serialization so session snapshots written to the cache cannot carry it.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub email_validated: bool,
    pub rights: Rights,
    #[serde(skip_serializing, default)]
    pub password_hash: Vec<u8>,
    pub creation_time: DateTime<Utc>,
}

impl UserRecord {
    /// Login gate: validated email plus `login`, or `admin` as an override
    pub fn is_active(&self) -> bool {
        (self.email_validated && self.rights.has(LOGIN)) || self.rights.has(ADMIN)
    }

    pub fn is_admin(&self) -> bool {
        self.rights.has(ADMIN)
    }

    /// Copy suitable for a session snapshot
    pub fn without_credentials(&self) -> Self {
        Self {
            password_hash: Vec::new(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("email_validated", &self.email_validated)
            .field("rights", &self.rights)
            .field("password_hash", &"[REDACTED]")
            .field("creation_time", &self.creation_time)
            .finish()
    }
}

/// Server-side record of an authenticated identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier, assigned by the session cache on put
    pub id: String,
    /// User snapshot frozen at login time
    pub user: UserRecord,
    pub created_at: DateTime<Utc>,
    pub duration_secs: u64,
}

impl Session {
    /// New unsaved session for `user` with the standard validity
    pub fn for_user(user: &UserRecord) -> Self {
        Self {
            id: String::new(),
            user: user.without_credentials(),
            created_at: Utc::now(),
            duration_secs: SESSION_DURATION_SECS,
        }
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn rights(&self) -> &Rights {
        &self.user.rights
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.duration_secs as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Seconds of validity left at `now`, zero once expired
    pub fn remaining_secs_at(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at() - now).num_seconds().max(0) as u64
    }
}

/// Outstanding email-validation ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTicket {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

/// Result of a registration attempt
///
/// Duplicates are expected business outcomes, not errors.
#[derive(Debug, Clone)]
pub enum Registration {
    Success(UserRecord),
    DuplicateUsername,
    DuplicateEmail,
}

impl Registration {
    pub fn is_success(&self) -> bool {
        matches!(self, Registration::Success(_))
    }
}
