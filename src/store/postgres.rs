// Postgres-backed credential store

use super::{resolve_rights_change, CredentialStore, ExistenceCheck, RightsChange};
use crate::core::errors::IdentityError;
use crate::core::models::{Rights, UserRecord, ValidationTicket, ADMIN};
use crate::utils::redact_url;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Database row for a registered user
#[derive(FromRow)]
struct UserRow {
    username: String,
    email: String,
    email_validated: bool,
    creation_time: NaiveDateTime,
    password_hash: Vec<u8>,
    rights: Option<String>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        UserRecord {
            username: row.username,
            email: row.email,
            email_validated: row.email_validated,
            rights: Rights::parse(row.rights.as_deref().unwrap_or_default()),
            password_hash: row.password_hash,
            creation_time: row.creation_time.and_utc(),
        }
    }
}

/// Credential store over a Postgres pool
///
/// Backend calls are bounded by the pool's acquire timeout and the
/// statement timeout set on each connection.
pub struct PgCredentialStore {
    pool: PgPool,
    ticket_ttl: Duration,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, ticket_ttl: Duration) -> Self {
        Self { pool, ticket_ttl }
    }

    /// Open a pool against `database_url`
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
        ticket_ttl: Duration,
    ) -> Result<Self, IdentityError> {
        let options = PgConnectOptions::from_str(database_url).map_err(|e| {
            IdentityError::Configuration(format!(
                "Invalid database URL {}: {}",
                redact_url(database_url),
                e
            ))
        })?;
        let store = Self::connect_with(options, max_connections, timeout, ticket_ttl).await?;

        info!(database = %redact_url(database_url), "Connected to database");
        Ok(store)
    }

    /// Open a pool from prepared connect options
    ///
    /// Every pooled connection gets `statement_timeout` set to `timeout`.
    pub async fn connect_with(
        options: PgConnectOptions,
        max_connections: u32,
        timeout: Duration,
        ticket_ttl: Duration,
    ) -> Result<Self, IdentityError> {
        let statement_timeout = format!("SET statement_timeout = {}", timeout.as_millis());
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .after_connect(move |conn, _meta| {
                let statement_timeout = statement_timeout.clone();
                Box::pin(async move {
                    conn.execute(sqlx::raw_sql(&statement_timeout)).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| {
                IdentityError::BackendUnavailable(format!("Failed to connect to database: {}", e))
            })?;

        Ok(Self::new(pool, ticket_ttl))
    }

    /// Underlying pool, shared with the schema manager
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn ticket_ttl_secs(&self) -> f64 {
        self.ticket_ttl.as_secs_f64()
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn check_exists(&self, username: &str, email: &str) -> Result<ExistenceCheck, IdentityError> {
        let (user_count, email_count): (i64, i64) = sqlx::query_as(
            "SELECT
                (SELECT count(*) FROM jutzo_registered_user WHERE username = $1),
                (SELECT count(*) FROM jutzo_registered_user WHERE email = $2)",
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(ExistenceCheck {
            username_taken: user_count > 0,
            email_taken: email_count > 0,
        })
    }

    async fn create(&self, username: &str, email: &str, password_hash: &[u8]) -> Result<UserRecord, IdentityError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO jutzo_registered_user (username, email, password_hash, rights)
             VALUES ($1, $2, $3, $4)
             RETURNING username, email, email_validated, creation_time, password_hash, rights",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(Rights::default_for_new_user().to_storage_string())
        .fetch_one(&self.pool)
        .await?;

        debug!(username = %username, "Stored new user");
        Ok(row.into())
    }

    async fn lookup(&self, username: &str) -> Result<UserRecord, IdentityError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT username, email, email_validated, creation_time, password_hash, rights
             FROM jutzo_registered_user
             WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRecord::from)
            .ok_or_else(|| IdentityError::NotFound("user".to_string()))
    }

    async fn change_rights(&self, username: &str, change: &RightsChange) -> Result<Rights, IdentityError> {
        let mut tx = self.pool.begin().await?;

        // Locks the target and every administrator in one order. A concurrent
        // demotion waits here and then re-reads the admin set it changed.
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT username, rights FROM jutzo_registered_user
             WHERE username = $1 OR ',' || coalesce(rights, '') || ',' LIKE '%,admin,%'
             ORDER BY username
             FOR UPDATE",
        )
        .bind(username)
        .fetch_all(&mut *tx)
        .await?;

        let mut current = None;
        let mut other_admins = 0i64;
        for (name, stored) in rows {
            let rights = Rights::parse(stored.as_deref().unwrap_or_default());
            if name == username {
                current = Some(rights);
            } else if rights.has(ADMIN) {
                other_admins += 1;
            }
        }
        let current = current.ok_or_else(|| IdentityError::NotFound("user".to_string()))?;
        let updated = resolve_rights_change(&current, change, other_admins)?;

        if updated != current {
            sqlx::query("UPDATE jutzo_registered_user SET rights = $1 WHERE username = $2")
                .bind(updated.to_storage_string())
                .bind(username)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(username = %username, rights = %updated, "Stored rights");
        Ok(updated)
    }

    async fn list(&self, after: &str, limit: i64) -> Result<Vec<UserRecord>, IdentityError> {
        let limit = if limit <= 0 { i32::MAX as i64 } else { limit };

        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT username, email, email_validated, creation_time, password_hash, rights
             FROM jutzo_registered_user
             WHERE username > $1
             ORDER BY username
             LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // Listings never expose hashes
        Ok(rows
            .into_iter()
            .map(|row| UserRecord::from(row).without_credentials())
            .collect())
    }

    async fn count_admins(&self) -> Result<i64, IdentityError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM jutzo_registered_user
             WHERE ',' || coalesce(rights, '') || ',' LIKE '%,admin,%'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn create_validation_ticket(&self, username: &str) -> Result<ValidationTicket, IdentityError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent ticket requests for the same user
        let email: Option<String> = sqlx::query_scalar(
            "SELECT email FROM jutzo_registered_user WHERE username = $1 FOR UPDATE",
        )
        .bind(username)
        .fetch_optional(&mut *tx)
        .await?;
        let email = email.ok_or_else(|| IdentityError::NotFound("user".to_string()))?;

        sqlx::query(
            "DELETE FROM jutzo_pending_validation
             WHERE username = $1 OR creation_time < now() - make_interval(secs => $2)",
        )
        .bind(username)
        .bind(self.ticket_ttl_secs())
        .execute(&mut *tx)
        .await?;

        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO jutzo_pending_validation (username) VALUES ($1) RETURNING uuid",
        )
        .bind(username)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(username = %username, "Created validation ticket");
        Ok(ValidationTicket {
            id,
            username: username.to_string(),
            email,
        })
    }

    async fn consume_validation_ticket(&self, ticket_id: &Uuid) -> Result<String, IdentityError> {
        let mut tx = self.pool.begin().await?;

        let ticket: Option<(String, bool)> = sqlx::query_as(
            "DELETE FROM jutzo_pending_validation
             WHERE uuid = $1
             RETURNING username, creation_time >= now() - make_interval(secs => $2)",
        )
        .bind(ticket_id)
        .bind(self.ticket_ttl_secs())
        .fetch_optional(&mut *tx)
        .await?;

        let username = match ticket {
            Some((username, true)) => username,
            Some((username, false)) => {
                // Expired tickets are removed but grant nothing
                tx.commit().await?;
                debug!(username = %username, "Discarded expired validation ticket");
                return Err(IdentityError::NotFound("validation ticket".to_string()));
            }
            None => return Err(IdentityError::NotFound("validation ticket".to_string())),
        };

        sqlx::query("UPDATE jutzo_registered_user SET email_validated = true WHERE username = $1")
            .bind(&username)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(username = %username, "Email validated");
        Ok(username)
    }

    async fn ping(&self) -> Result<(), IdentityError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Database pool closed");
        }
    }
}
