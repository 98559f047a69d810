// Authorization engine: registration, login, sessions, tickets and rights

use crate::auth::password::PasswordPolicy;
use crate::auth::token::TokenCodec;
use crate::auth::validation::validate_registration;
use crate::config::Config;
use crate::core::errors::{ConstraintField, IdentityError};
use crate::core::models::{Registration, Rights, Session, UserRecord, ValidationTicket, ADMIN};
use crate::state::SessionCache;
use crate::store::{CredentialStore, RightsChange};
use crate::utils::fingerprint;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Password hashed at startup so unknown-user logins cost the same as real ones
const DUMMY_PASSWORD: &str = "jutzo-timing-equalizer";

/// Stateless orchestrator over the credential store, session cache and codec
///
/// Holds only shared handles; every call is independent, so one engine can be
/// shared across tasks behind an `Arc`.
pub struct AuthorizationEngine {
    config: Arc<Config>,
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn SessionCache>,
    codec: TokenCodec,
    passwords: PasswordPolicy,
    dummy_hash: Vec<u8>,
}

impl AuthorizationEngine {
    /// Build the engine and make sure an administrator exists
    ///
    /// When the store has no admin, one is created (or an existing user of that
    /// name is promoted) from the configured bootstrap credentials. Without
    /// those credentials construction fails.
    pub async fn new(
        config: Arc<Config>,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn SessionCache>,
    ) -> Result<Self, IdentityError> {
        let codec = config.token_codec()?;
        let passwords = PasswordPolicy::new(config.hash_cost)?;
        let dummy_hash = hash_blocking(passwords, DUMMY_PASSWORD).await?;

        let engine = Self {
            config,
            store,
            cache,
            codec,
            passwords,
            dummy_hash,
        };
        engine.bootstrap_admin().await?;
        Ok(engine)
    }

    async fn bootstrap_admin(&self) -> Result<(), IdentityError> {
        let admins = self.store.count_admins().await?;
        if admins > 0 {
            debug!(admins, "Administrator present");
            return Ok(());
        }

        let admin = self.config.admin.as_ref().ok_or_else(|| {
            IdentityError::Configuration(
                "no administrator found, and missing configuration to create one".to_string(),
            )
        })?;

        info!(username = %admin.username, email = %admin.email, "Creating administrator");
        let registration = self
            .register(&admin.username, admin.password.expose_secret(), &admin.email)
            .await?;

        let user = match registration {
            Registration::Success(user) => user,
            Registration::DuplicateUsername => {
                warn!(username = %admin.username, "Promoting existing user to administrator");
                self.store.lookup(&admin.username).await?
            }
            Registration::DuplicateEmail => {
                return Err(IdentityError::Configuration(format!(
                    "administrator email {} belongs to another user",
                    admin.email
                )));
            }
        };

        self.store
            .change_rights(&user.username, &RightsChange::Grant(ADMIN.to_string()))
            .await?;

        info!(username = %user.username, "Administrator rights granted");
        Ok(())
    }

    /// Register a new user with rights `{login}`, not email-validated
    ///
    /// A username collision is reported before an email collision. Losing a
    /// race against a concurrent registration is reported as the duplicate.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<Registration, IdentityError> {
        validate_registration(username, password, email)?;

        let existing = self.store.check_exists(username, email).await?;
        if existing.username_taken {
            debug!(username = %username, "Registration rejected: duplicate username");
            return Ok(Registration::DuplicateUsername);
        }
        if existing.email_taken {
            debug!(username = %username, "Registration rejected: duplicate email");
            return Ok(Registration::DuplicateEmail);
        }

        let hash = hash_blocking(self.passwords, password).await?;

        match self.store.create(username, email, &hash).await {
            Ok(user) => {
                info!(username = %username, "User registered");
                Ok(Registration::Success(user.without_credentials()))
            }
            Err(IdentityError::ConstraintViolation(ConstraintField::Username)) => {
                Ok(Registration::DuplicateUsername)
            }
            Err(IdentityError::ConstraintViolation(ConstraintField::Email)) => {
                Ok(Registration::DuplicateEmail)
            }
            Err(e) => Err(e),
        }
    }

    /// Authenticate and open a session
    ///
    /// Unknown user, wrong password and inactive account all produce the same
    /// `AuthenticationFailed`. Active means validated email plus `login`, or `admin`.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, IdentityError> {
        let user = match self.store.lookup(username).await {
            Ok(user) => Some(user),
            Err(IdentityError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let Some(user) = user else {
            verify_blocking(self.dummy_hash.clone(), password).await?;
            debug!(username = %username, "Login failed: unknown user");
            return Err(IdentityError::AuthenticationFailed);
        };

        let verified = verify_blocking(user.password_hash.clone(), password).await?;
        if !verified {
            debug!(username = %username, "Login failed: password mismatch");
            return Err(IdentityError::AuthenticationFailed);
        }
        if !user.is_active() {
            debug!(username = %username, "Login failed: account inactive");
            return Err(IdentityError::AuthenticationFailed);
        }

        let session = self.cache.put(Session::for_user(&user)).await?;
        info!(
            username = %username,
            session = %fingerprint(&session.id),
            "Login succeeded"
        );
        Ok(session)
    }

    /// Bearer token for `session`, expiring together with the session
    pub fn issue_token(&self, session: &Session) -> Result<String, IdentityError> {
        let remaining = session.remaining_secs_at(Utc::now());
        self.codec
            .encode(session.username(), &session.id, Duration::from_secs(remaining))
    }

    /// Resolve a bearer token to its live session
    ///
    /// Any failure, whether in decoding, lookup or a subject mismatch, is `Unauthorized`.
    pub async fn require_session(&self, token: &str) -> Result<Session, IdentityError> {
        let claims = self.codec.decode_claims(token).map_err(|e| {
            debug!(error = %e, "Token rejected");
            IdentityError::Unauthorized
        })?;

        let session = match self.cache.get(&claims.id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(session = %fingerprint(&claims.id), "Session not found");
                return Err(IdentityError::Unauthorized);
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                return Err(IdentityError::Unauthorized);
            }
        };

        if session.username() != claims.sub {
            warn!(session = %fingerprint(&claims.id), "Token subject does not match session");
            return Err(IdentityError::Unauthorized);
        }
        Ok(session)
    }

    /// Require every right in `required` (AND semantics) on the session snapshot
    pub fn require_rights<S: AsRef<str>>(&self, session: &Session, required: &[S]) -> Result<(), IdentityError> {
        let missing = session.rights().missing(required);
        if missing.is_empty() {
            Ok(())
        } else {
            debug!(username = %session.username(), missing = ?missing, "Rights check denied");
            Err(IdentityError::Forbidden { missing })
        }
    }

    /// Destroy a session. Unknown ids are not an error.
    pub async fn logoff(&self, session_id: &str) -> Result<(), IdentityError> {
        self.cache.delete(session_id).await
    }

    /// Issue a fresh email-validation ticket, superseding any earlier one
    pub async fn create_validation_ticket(&self, username: &str) -> Result<ValidationTicket, IdentityError> {
        self.store.create_validation_ticket(username).await
    }

    /// Redeem a ticket; unknown, malformed or expired ids are `NotFound`
    pub async fn consume_validation_ticket(&self, ticket_id: &str) -> Result<String, IdentityError> {
        let id = Uuid::parse_str(ticket_id.trim())
            .map_err(|_| IdentityError::NotFound("validation ticket".to_string()))?;
        self.store.consume_validation_ticket(&id).await
    }

    /// Page through users after `after`; `limit <= 0` is unbounded
    pub async fn list_users(&self, after: &str, limit: i64) -> Result<Vec<UserRecord>, IdentityError> {
        self.store.list(after, limit).await
    }

    pub async fn lookup_user(&self, username: &str) -> Result<UserRecord, IdentityError> {
        Ok(self.store.lookup(username).await?.without_credentials())
    }

    /// Replace a user's rights
    ///
    /// Live sessions keep their snapshot; the change applies from the next login.
    /// Refuses an empty set and removing `admin` from the last administrator.
    pub async fn update_rights(&self, username: &str, rights: &Rights) -> Result<(), IdentityError> {
        if rights.is_empty() {
            return Err(IdentityError::Validation("rights must not be empty".to_string()));
        }
        for right in rights.iter() {
            validate_right_name(right)?;
        }

        let updated = self
            .store
            .change_rights(username, &RightsChange::Replace(rights.clone()))
            .await?;
        info!(username = %username, rights = %updated, "Rights updated");
        Ok(())
    }

    /// Add one right; returns the resulting set
    pub async fn grant_right(&self, username: &str, right: &str) -> Result<Rights, IdentityError> {
        validate_right_name(right)?;
        let rights = self
            .store
            .change_rights(username, &RightsChange::Grant(right.to_string()))
            .await?;
        info!(username = %username, right = %right, "Right granted");
        Ok(rights)
    }

    /// Remove one right; returns the resulting set
    pub async fn revoke_right(&self, username: &str, right: &str) -> Result<Rights, IdentityError> {
        let rights = self
            .store
            .change_rights(username, &RightsChange::Revoke(right.to_string()))
            .await?;
        info!(username = %username, right = %right, "Right revoked");
        Ok(rights)
    }

    pub async fn count_admins(&self) -> Result<i64, IdentityError> {
        self.store.count_admins().await
    }

    /// Probe both backends
    pub async fn ping(&self) -> Result<(), IdentityError> {
        self.store.ping().await?;
        self.cache.ping().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn SessionCache> {
        &self.cache
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Close backend connections. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
        info!("Engine shut down");
    }
}

/// Right names end up in a comma-joined column
fn validate_right_name(right: &str) -> Result<(), IdentityError> {
    if right.is_empty() || right.contains(',') || right.chars().any(char::is_whitespace) {
        return Err(IdentityError::Validation(format!("invalid right name '{}'", right)));
    }
    Ok(())
}

async fn hash_blocking(policy: PasswordPolicy, password: &str) -> Result<Vec<u8>, IdentityError> {
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || policy.hash(&password))
        .await
        .map_err(|e| IdentityError::PasswordHash(format!("hashing task failed: {}", e)))?
}

async fn verify_blocking(stored: Vec<u8>, password: &str) -> Result<bool, IdentityError> {
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || crate::auth::password::verify_password(&stored, &password))
        .await
        .map_err(|e| IdentityError::PasswordHash(format!("verification task failed: {}", e)))
}
